use crate::core::errors::HubError;
use crate::core::types::{PriceGroup, StockSnapshot};
use crate::hub::protocol::ProtocolMessage;
use serde_json::Value;
use tracing::{debug, warn};

/// Batched ticker snapshots, one event per item after sorting by date
pub const STOCK_PRICES_TOPIC: &str = "StockPricesChanged";
/// Aggregate price board, forwarded as a single `prices` event
pub const PRICES_TOPIC: &str = "PricesChanged";
/// Index values, one `indexes` event per element
pub const INDEXES_TOPIC: &str = "IndexesChanged";
/// Market-wide totals, forwarded as a single `market-totals` event
pub const MARKET_TOTALS_TOPIC: &str = "MarketTotalsChanged";

/// Index membership that decides the group of a snapshot, checked in order
const GROUP_INDEXES: &[(&str, PriceGroup)] = &[
    ("MERVAL", PriceGroup::Merval),
    ("GENERAL", PriceGroup::PanelGeneral),
    ("CEDEARS", PriceGroup::Cedears),
    ("BONOS", PriceGroup::Bonds),
];

/// Everything consumers can observe on a hub connection
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    Connected,
    Disconnected,
    Error(HubError),
    /// Every decoded record, before classification
    Message(ProtocolMessage),
    Price {
        group: PriceGroup,
        snapshot: Box<StockSnapshot>,
    },
    Prices(Value),
    Index(Value),
    MarketTotals(Value),
}

impl HubEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connect",
            Self::Disconnected => "disconnect",
            Self::Error(_) => "error",
            Self::Message(_) => "message",
            Self::Price { group, .. } => group.event_name(),
            Self::Prices(_) => "prices",
            Self::Index(_) => "indexes",
            Self::MarketTotals(_) => "market-totals",
        }
    }
}

/// Turns broadcast records into typed topic events
#[derive(Debug, Clone, Copy, Default)]
pub struct Router;

impl Router {
    pub const fn new() -> Self {
        Self
    }

    /// Classify one broadcast record
    ///
    /// Per-item problems come back as [`HubEvent::Error`] entries in place of
    /// the item; they never abort the rest of the batch.
    pub fn route(&self, message: &ProtocolMessage) -> Vec<HubEvent> {
        let Some(target) = message.target.as_deref() else {
            return Vec::new();
        };
        let payload = message.arguments().first();

        match target {
            STOCK_PRICES_TOPIC => payload.map_or_else(Vec::new, route_stock_prices),
            PRICES_TOPIC => payload.cloned().map(HubEvent::Prices).into_iter().collect(),
            MARKET_TOTALS_TOPIC => payload
                .cloned()
                .map(HubEvent::MarketTotals)
                .into_iter()
                .collect(),
            INDEXES_TOPIC => match payload {
                Some(Value::Array(indexes)) => indexes.iter().cloned().map(HubEvent::Index).collect(),
                Some(other) => vec![HubEvent::Index(other.clone())],
                None => Vec::new(),
            },
            other => {
                debug!(target = other, "unrouted broadcast");
                Vec::new()
            }
        }
    }
}

fn route_stock_prices(payload: &Value) -> Vec<HubEvent> {
    let Value::Array(items) = payload else {
        warn!("stock price broadcast without a list payload");
        return vec![HubEvent::Error(HubError::Decode(
            "stock price broadcast payload is not a list".to_string(),
        ))];
    };

    let mut events = Vec::new();
    let mut snapshots = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<StockSnapshot>(item.clone()) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => events.push(HubEvent::Error(HubError::Decode(format!(
                "invalid ticker snapshot: {}",
                e
            )))),
        }
    }

    // Stable: equal timestamps keep their broadcast order
    snapshots.sort_by_key(|snapshot| snapshot.date);

    for snapshot in snapshots {
        match classify(&snapshot) {
            Some(group) => events.push(HubEvent::Price {
                group,
                snapshot: Box::new(snapshot),
            }),
            None => {
                warn!(ticker = %snapshot.ticker, "unclassified price update");
                events.push(HubEvent::Error(HubError::Classification {
                    ticker: snapshot.ticker,
                }));
            }
        }
    }

    events
}

/// Group of a snapshot: index membership first, then option metadata
pub fn classify(snapshot: &StockSnapshot) -> Option<PriceGroup> {
    GROUP_INDEXES
        .iter()
        .find(|(index, _)| {
            snapshot
                .indexes
                .iter()
                .any(|member| member.eq_ignore_ascii_case(index))
        })
        .map(|(_, group)| *group)
        .or_else(|| snapshot.is_option.then_some(PriceGroup::Options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(ticker: &str, date: &str, indexes: &[&str], is_option: bool) -> Value {
        json!({
            "ticker": ticker,
            "date": date,
            "indexes": indexes,
            "stockOffer": { "ask": [], "bid": [] },
            "term": "3",
            "isOption": is_option
        })
    }

    fn tickers(events: &[HubEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                HubEvent::Price { snapshot, .. } => Some(snapshot.ticker.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_batch_is_sorted_by_timestamp() {
        let message = ProtocolMessage::broadcast(
            STOCK_PRICES_TOPIC,
            vec![json!([
                snapshot("LATE", "2023-08-18T17:35:23-03:00", &["MERVAL"], false),
                snapshot("EARLY", "2023-08-18T17:35:21-03:00", &["MERVAL"], false),
            ])],
        );

        let events = Router::new().route(&message);
        assert_eq!(tickers(&events), vec!["EARLY", "LATE"]);
    }

    #[test]
    fn test_sorting_honours_offsets() {
        // 20:00Z is earlier than 17:30-03:00 (20:30Z)
        let message = ProtocolMessage::broadcast(
            STOCK_PRICES_TOPIC,
            vec![json!([
                snapshot("B", "2023-08-18T17:30:00-03:00", &["MERVAL"], false),
                snapshot("A", "2023-08-18T20:00:00Z", &["MERVAL"], false),
            ])],
        );

        assert_eq!(tickers(&Router::new().route(&message)), vec!["A", "B"]);
    }

    #[test]
    fn test_classification_by_index_and_option_fallback() {
        let message = ProtocolMessage::broadcast(
            STOCK_PRICES_TOPIC,
            vec![json!([
                snapshot("GGAL", "2023-08-18T10:00:00-03:00", &["merval", "GENERAL"], false),
                snapshot("CEPU", "2023-08-18T10:00:01-03:00", &["GENERAL"], false),
                snapshot("GFGC3300O", "2023-08-18T10:00:02-03:00", &[], true),
            ])],
        );

        let groups: Vec<PriceGroup> = Router::new()
            .route(&message)
            .into_iter()
            .filter_map(|event| match event {
                HubEvent::Price { group, .. } => Some(group),
                _ => None,
            })
            .collect();
        assert_eq!(
            groups,
            vec![PriceGroup::Merval, PriceGroup::PanelGeneral, PriceGroup::Options]
        );
    }

    #[test]
    fn test_unclassified_item_is_skipped_not_fatal() {
        let message = ProtocolMessage::broadcast(
            STOCK_PRICES_TOPIC,
            vec![json!([
                snapshot("XYZ", "2023-08-18T10:00:00-03:00", &["UNKNOWN"], false),
                snapshot("ALUA", "2023-08-18T10:00:01-03:00", &["MERVAL"], false),
            ])],
        );

        let events = Router::new().route(&message);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            HubEvent::Error(HubError::Classification {
                ticker: "XYZ".to_string()
            })
        );
        assert_eq!(tickers(&events), vec!["ALUA"]);
    }

    #[test]
    fn test_invalid_item_reports_decode_error() {
        let message = ProtocolMessage::broadcast(
            STOCK_PRICES_TOPIC,
            vec![json!([
                { "ticker": "NODATE" },
                snapshot("ALUA", "2023-08-18T10:00:01-03:00", &["MERVAL"], false),
            ])],
        );

        let events = Router::new().route(&message);
        assert!(matches!(events[0], HubEvent::Error(HubError::Decode(_))));
        assert_eq!(tickers(&events), vec!["ALUA"]);
    }

    #[test]
    fn test_indexes_batch_emits_one_event_per_element() {
        let message = ProtocolMessage::broadcast(
            INDEXES_TOPIC,
            vec![json!([{ "name": "MERVAL" }, { "name": "GENERAL" }])],
        );

        let events = Router::new().route(&message);
        assert_eq!(
            events,
            vec![
                HubEvent::Index(json!({ "name": "MERVAL" })),
                HubEvent::Index(json!({ "name": "GENERAL" })),
            ]
        );
        assert!(events.iter().all(|event| event.name() == "indexes"));
    }

    #[test]
    fn test_single_payload_topics() {
        let router = Router::new();
        let totals = router.route(&ProtocolMessage::broadcast(
            MARKET_TOTALS_TOPIC,
            vec![json!({ "volume": 10 })],
        ));
        assert_eq!(totals, vec![HubEvent::MarketTotals(json!({ "volume": 10 }))]);
        assert_eq!(totals[0].name(), "market-totals");

        let prices = router.route(&ProtocolMessage::broadcast(PRICES_TOPIC, vec![json!([1, 2])]));
        assert_eq!(prices, vec![HubEvent::Prices(json!([1, 2]))]);
    }

    #[test]
    fn test_unknown_topic_produces_nothing() {
        let message = ProtocolMessage::broadcast("SomethingElse", vec![json!(1)]);
        assert!(Router::new().route(&message).is_empty());
    }
}
