use crate::core::types::{PriceGroup, PriceLevel, StockSnapshot, Term};
use crate::hub::HubEvent;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct StoredSnapshot {
    group: PriceGroup,
    snapshot: StockSnapshot,
}

/// Latest snapshot per ticker and settlement term
///
/// Owned by the caller and fed from hub events; nothing in the hub itself
/// keeps prices around.
#[derive(Debug, Default, Clone)]
pub struct PriceStore {
    entries: HashMap<(String, Term), StoredSnapshot>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a price event; returns true when the store changed
    ///
    /// Snapshots without a known term, or older than the stored one, are ignored.
    pub fn apply(&mut self, event: &HubEvent) -> bool {
        let HubEvent::Price { group, snapshot } = event else {
            return false;
        };
        let Some(term) = snapshot.term() else {
            return false;
        };

        let key = (snapshot.ticker.clone(), term);
        if let Some(existing) = self.entries.get(&key) {
            if existing.snapshot.date > snapshot.date {
                return false;
            }
        }

        self.entries.insert(
            key,
            StoredSnapshot {
                group: *group,
                snapshot: snapshot.as_ref().clone(),
            },
        );
        true
    }

    pub fn get(&self, ticker: &str, term: Term) -> Option<&StockSnapshot> {
        self.entries
            .get(&(ticker.to_string(), term))
            .map(|stored| &stored.snapshot)
    }

    pub fn group(&self, ticker: &str, term: Term) -> Option<PriceGroup> {
        self.entries
            .get(&(ticker.to_string(), term))
            .map(|stored| stored.group)
    }

    pub fn best_bid(&self, ticker: &str, term: Term) -> Option<&PriceLevel> {
        self.get(ticker, term).and_then(StockSnapshot::best_bid)
    }

    pub fn best_ask(&self, ticker: &str, term: Term) -> Option<&PriceLevel> {
        self.get(ticker, term).and_then(StockSnapshot::best_ask)
    }

    /// Tickers known for `term`, sorted
    pub fn tickers(&self, term: Term) -> Vec<&str> {
        let mut tickers: Vec<&str> = self
            .entries
            .keys()
            .filter(|(_, entry_term)| *entry_term == term)
            .map(|(ticker, _)| ticker.as_str())
            .collect();
        tickers.sort_unstable();
        tickers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
