pub mod core;
pub mod hub;
pub mod utils;

pub use core::{
    config::HubConfig,
    errors::HubError,
    types::{ConnectionState, NegotiationInfo, PriceGroup, StockSnapshot, Term},
};
pub use hub::{HubConnection, HubEvent};
pub use utils::price_store::PriceStore;
