use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Unknown settlement term: {0}")]
    UnknownTerm(String),
}

/// Lifecycle of one hub connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Negotiating,
    Opening,
    Handshaking,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// True while a connect attempt is between negotiation and handshake
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Negotiating | Self::Opening | Self::Handshaking)
    }

    /// True when no transport is attached and a connect may start
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Opening => "opening",
            Self::Handshaking => "handshaking",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Result of the negotiate call, consumed once to build the transport URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationInfo {
    pub connection_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl NegotiationInfo {
    pub fn new(connection_token: impl Into<String>) -> Self {
        Self {
            connection_token: connection_token.into(),
            connection_id: None,
        }
    }
}

/// Settlement term of a price record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    /// Immediate settlement ("contado inmediato")
    #[serde(rename = "ci")]
    Immediate,
    /// Settlement in 48 hours
    #[serde(rename = "48hs")]
    Hours48,
}

impl Term {
    /// Code the hub expects for this term
    pub const fn code(self) -> &'static str {
        match self {
            Self::Immediate => "1",
            Self::Hours48 => "3",
        }
    }

    /// Map a wire code back to its term
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Self::Immediate),
            "3" => Some(Self::Hours48),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Immediate => "ci",
            Self::Hours48 => "48hs",
        }
    }
}

impl FromStr for Term {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ci" | "1" => Ok(Self::Immediate),
            "48hs" | "48" | "3" => Ok(Self::Hours48),
            other => Err(TypesError::UnknownTerm(other.to_string())),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Topic group a price update is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceGroup {
    Merval,
    PanelGeneral,
    Cedears,
    Bonds,
    Options,
}

impl PriceGroup {
    /// Event name consumers listen on
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Merval => "merval",
            Self::PanelGeneral => "panel-general",
            Self::Cedears => "cedears",
            Self::Bonds => "bonds",
            Self::Options => "options",
        }
    }
}

impl fmt::Display for PriceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Target of a group subscription: a group, optionally narrowed to a subgroup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSubscription {
    Group(String),
    Subgroup { name: String, subgroup: String },
}

impl GroupSubscription {
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::Group(name) => vec![Value::String(name.clone())],
            Self::Subgroup { name, subgroup } => {
                vec![Value::String(name.clone()), Value::String(subgroup.clone())]
            }
        }
    }
}

impl From<&str> for GroupSubscription {
    fn from(name: &str) -> Self {
        Self::Group(name.to_string())
    }
}

impl From<(&str, &str)> for GroupSubscription {
    fn from((name, subgroup): (&str, &str)) -> Self {
        Self::Subgroup {
            name: name.to_string(),
            subgroup: subgroup.to_string(),
        }
    }
}

/// One price level of the order book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Top of book as the hub sends it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockOffer {
    #[serde(default)]
    pub ask: Vec<PriceLevel>,
    #[serde(default)]
    pub bid: Vec<PriceLevel>,
}

/// Snapshot of one ticker inside a batched price broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSnapshot {
    pub ticker: String,
    pub date: DateTime<FixedOffset>,
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default)]
    pub stock_offer: StockOffer,
    /// Settlement code, `"1"` or `"3"`; numeric codes are accepted too
    #[serde(default, deserialize_with = "code_as_string")]
    pub term: Option<String>,
    #[serde(default)]
    pub is_option: bool,
    #[serde(default)]
    pub strike_price: Option<Decimal>,
    /// Fields this client does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StockSnapshot {
    pub fn term(&self) -> Option<Term> {
        self.term.as_deref().and_then(Term::from_code)
    }

    /// Lowest ask, the price a buyer pays
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.stock_offer.ask.first()
    }

    /// Highest bid, the price a seller receives
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.stock_offer.bid.first()
    }
}

fn code_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(code)) => Some(code),
        Some(Value::Number(code)) => Some(code.to_string()),
        _ => None,
    })
}
