//! Persistent broadcast channel to the broker's price hub
//!
//! # Example
//!
//! ```rust,no_run
//! use bullhub::core::config::HubConfig;
//! use bullhub::core::types::Term;
//! use bullhub::hub::{HubConnection, HubEvent};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = HubConnection::with_config(HubConfig::default())?;
//! let mut events = hub.subscribe();
//!
//! hub.connect(None).await?;
//! hub.subscribe_to_group("merval").await?;
//! hub.subscribe_to_price_change("GGAL", Term::Hours48).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let HubEvent::Price { group, snapshot } = event {
//!         println!("{} {} {:?}", group, snapshot.ticker, snapshot.best_ask());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
pub mod connection;
pub mod invocation;
pub mod keepalive;
pub mod protocol;
pub mod router;

pub use connection::{HubConnection, JOIN_GROUP, JOIN_STOCK_PRICE_CHANGE};
pub use protocol::{HandshakeRequest, MessageKind, ProtocolMessage};
pub use router::{
    classify, HubEvent, Router, INDEXES_TOPIC, MARKET_TOTALS_TOPIC, PRICES_TOPIC,
    STOCK_PRICES_TOPIC,
};
