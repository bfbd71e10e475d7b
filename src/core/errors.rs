use thiserror::Error;

/// Errors raised by the hub channel and its kernel.
///
/// The enum is `Clone` because a single outcome is handed to every caller
/// sharing an in-flight connect or disconnect, and errors are fanned out to
/// every event subscriber.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Transport open failed: {0}")]
    TransportOpen(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport closed: {0}")]
    TransportClosed(String),

    #[error("Handshake acknowledgement not received in time")]
    HandshakeTimeout,

    #[error("Invocation {0} was not acknowledged in time")]
    InvocationTimeout(String),

    #[error("Invocation {id} failed: {message}")]
    InvocationFailed { id: String, message: String },

    #[error("Connection destroyed")]
    ConnectionDestroyed,

    #[error("Hub is not connected")]
    NotConnected,

    #[error("Cannot classify price update for {ticker}")]
    Classification { ticker: String },

    #[error("Failed to decode record: {0}")]
    Decode(String),

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Remote error: {0}")]
    RemoteError(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),
}
