//! Transport kernel of the hub client
//!
//! The kernel holds only plumbing and has no knowledge of the hub protocol:
//!
//! - [`codec::HubCodec`]: separator-terminated JSON record framing
//! - [`ws::Transport`]: full-duplex text transport, with the tungstenite
//!   implementation [`ws::TungsteniteTransport`]
//! - [`rest::Negotiator`]: one-shot token negotiation, with the reqwest
//!   implementation [`rest::ReqwestNegotiator`]
//!
//! Both seams are traits so the connection can be driven against in-memory
//! doubles in tests.
pub mod codec;
pub mod rest;
pub mod ws;

pub use codec::{HubCodec, RECORD_SEPARATOR};
pub use rest::{negotiate_url, transport_url, Negotiator, ReqwestNegotiator};
pub use ws::{Transport, TransportSink, TransportStream, TungsteniteTransport};
