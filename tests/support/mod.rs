//! In-memory transport and negotiator for driving a hub connection in tests

use async_trait::async_trait;
use bullhub::core::errors::HubError;
use bullhub::core::kernel::{Negotiator, Transport, TransportSink, TransportStream, RECORD_SEPARATOR};
use bullhub::core::types::NegotiationInfo;
use bullhub::hub::HubConnection;
use bullhub::HubConfig;
use futures::channel::mpsc as chan;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const HUB_URL: &str = "https://hub.test/stockPricesHub";

/// Server side of one opened transport
pub struct Peer {
    pub url: String,
    sent: chan::UnboundedReceiver<String>,
    inbound: Option<chan::UnboundedSender<Result<String, HubError>>>,
}

impl Peer {
    /// Next raw chunk written by the client, `None` once it closed its side
    pub async fn recv(&mut self) -> Option<String> {
        self.sent.next().await
    }

    /// Next record written by the client, checked for its terminator
    pub async fn recv_json(&mut self) -> Value {
        let text = self.recv().await.expect("client closed the transport");
        let record = text
            .strip_suffix(RECORD_SEPARATOR)
            .expect("record is not terminated");
        serde_json::from_str(record).expect("client sent invalid json")
    }

    /// Deliver a raw chunk to the client
    pub fn push(&self, chunk: &str) {
        self.inbound
            .as_ref()
            .expect("peer already closed")
            .unbounded_send(Ok(chunk.to_string()))
            .expect("client dropped the transport");
    }

    pub fn push_record(&self, record: &Value) {
        self.push(&format!("{}{}", record, RECORD_SEPARATOR));
    }

    /// Deliver a failed item, as the transport reports read or frame errors
    pub fn push_error(&self, error: HubError) {
        self.inbound
            .as_ref()
            .expect("peer already closed")
            .unbounded_send(Err(error))
            .expect("client dropped the transport");
    }

    pub async fn accept_handshake(&mut self) {
        let handshake = self.recv_json().await;
        assert_eq!(handshake, json!({"protocol": "json", "version": 1}));
        self.push_record(&json!({}));
    }

    /// Acknowledge the next invocation and return the record that was sent
    pub async fn ack_next_invocation(&mut self) -> Value {
        let call = self.recv_json().await;
        let id = call["invocationId"].clone();
        self.push_record(&json!({"type": 3, "invocationId": id}));
        call
    }

    /// Close the server side of the transport
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// Wait until the client has closed its side, discarding anything it sent
    pub async fn wait_client_close(&mut self) {
        while self.recv().await.is_some() {}
    }

    /// Wait for the client to close its side, then finish the close
    pub async fn complete_close(&mut self) {
        self.wait_client_close().await;
        self.close();
    }
}

pub struct MockTransport {
    peers: mpsc::UnboundedSender<Peer>,
    opened: AtomicUsize,
    fail_with: Mutex<Option<HubError>>,
}

impl MockTransport {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn fail_next_open(&self, error: HubError) {
        *self.fail_with.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &str) -> Result<(TransportSink, TransportStream), HubError> {
        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let (out_tx, out_rx) = chan::unbounded::<String>();
        let (in_tx, in_rx) = chan::unbounded::<Result<String, HubError>>();
        let _ = self.peers.send(Peer {
            url: url.to_string(),
            sent: out_rx,
            inbound: Some(in_tx),
        });

        let sink: TransportSink =
            Box::pin(out_tx.sink_map_err(|e| HubError::Transport(e.to_string())));
        let stream: TransportStream = Box::pin(in_rx);
        Ok((sink, stream))
    }
}

pub struct MockNegotiator {
    result: Mutex<Result<NegotiationInfo, HubError>>,
    calls: AtomicUsize,
}

impl MockNegotiator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_with(&self, error: HubError) {
        *self.result.lock().unwrap() = Err(error);
    }
}

#[async_trait]
impl Negotiator for MockNegotiator {
    async fn negotiate(&self) -> Result<NegotiationInfo, HubError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}

pub struct MockServer {
    peers: mpsc::UnboundedReceiver<Peer>,
    pub transport: Arc<MockTransport>,
    pub negotiator: Arc<MockNegotiator>,
}

impl MockServer {
    pub async fn next_peer(&mut self) -> Peer {
        self.peers.recv().await.expect("transport was not opened")
    }
}

/// Hub wired to in-memory collaborators; negotiation yields `token`
pub fn hub_with_token(token: &str) -> (HubConnection, MockServer) {
    let (peers_tx, peers) = mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        peers: peers_tx,
        opened: AtomicUsize::new(0),
        fail_with: Mutex::new(None),
    });
    let negotiator = Arc::new(MockNegotiator {
        result: Mutex::new(Ok(NegotiationInfo::new(token))),
        calls: AtomicUsize::new(0),
    });

    let hub = HubConnection::new(
        HubConfig::new(HUB_URL),
        transport.clone(),
        negotiator.clone(),
    );
    let server = MockServer {
        peers,
        transport,
        negotiator,
    };
    (hub, server)
}

/// Connect and complete the handshake, returning the server side
pub async fn open_hub(hub: &HubConnection, server: &mut MockServer) -> Peer {
    let connecting = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.connect(None).await })
    };
    let mut peer = server.next_peer().await;
    peer.accept_handshake().await;
    connecting.await.unwrap().unwrap();
    peer
}
