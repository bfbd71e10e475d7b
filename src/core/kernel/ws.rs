use crate::core::errors::HubError;
use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, protocol::Message},
};
use tracing::{debug, instrument};

/// Outbound half of an open transport; closing it starts the close handshake
pub type TransportSink = Pin<Box<dyn Sink<String, Error = HubError> + Send>>;

/// Inbound half of an open transport
///
/// Yields text chunks. `Some(Err(HubError::Decode(_)))` rejects one frame and
/// the stream stays usable; any other error ends the transport, as does the
/// end of the stream.
pub type TransportStream = Pin<Box<dyn Stream<Item = Result<String, HubError>> + Send>>;

/// Full-duplex text transport - pure plumbing, no protocol knowledge
///
/// `open` resolves once the transport is ready to carry traffic.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<(TransportSink, TransportStream), HubError>;
}

/// Tungstenite-based WebSocket transport
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    connect_timeout: Duration,
}

impl TungsteniteTransport {
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    #[instrument(skip(self, url), fields(timeout_ms = self.connect_timeout.as_millis() as u64))]
    async fn open(&self, url: &str) -> Result<(TransportSink, TransportStream), HubError> {
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| HubError::TransportOpen("WebSocket connection timeout".to_string()))?
            .map_err(|e| HubError::TransportOpen(format!("WebSocket connection failed: {}", e)))?;

        debug!("websocket transport open");
        let (write, read) = ws_stream.split();

        let sink = write
            .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(Message::Text(text))))
            .sink_map_err(|e| HubError::Transport(format!("Failed to send WebSocket message: {}", e)));

        // Control frames are answered by tungstenite itself; only data reaches the hub
        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(data)) => Some(
                    String::from_utf8(data)
                        .map_err(|e| HubError::Decode(format!("non utf-8 frame: {}", e))),
                ),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket close frame received");
                    None
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(e) => Some(Err(HubError::Transport(format!("WebSocket error: {}", e)))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
