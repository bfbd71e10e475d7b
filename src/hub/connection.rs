//! Hub connection state machine
//!
//! A [`HubConnection`] is a cheap, cloneable handle. All state lives in one
//! actor task that owns the transport, the invocation tracker and the
//! keepalive timer; handles talk to it over a command channel and get their
//! answers on oneshot replies. Because the actor is the only place that
//! touches connection state, every transition is serialized:
//!
//! ```text
//! Idle -connect-> Negotiating -token-> Opening -ready-> Handshaking -ack-> Open
//! Open -disconnect-> Closing -closed-> Closed (== Idle for the next connect)
//! ```
//!
//! Concurrent `connect` calls made while an attempt is in flight join that
//! attempt and receive its outcome. `disconnect` calls made while closing
//! join the close. `disconnect` during a connect waits for the connect to
//! settle, and `connect` while open runs a full reconnect cycle.

use crate::core::config::HubConfig;
use crate::core::errors::HubError;
use crate::core::kernel::{
    transport_url, HubCodec, Negotiator, ReqwestNegotiator, Transport, TransportSink,
    TransportStream, TungsteniteTransport,
};
use crate::core::types::{ConnectionState, GroupSubscription, NegotiationInfo, Term};
use crate::hub::invocation::{InvocationReply, InvocationTracker};
use crate::hub::keepalive::Keepalive;
use crate::hub::protocol::{HandshakeRequest, MessageKind, ProtocolMessage};
use crate::hub::router::{HubEvent, Router};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::future::pending;
use std::mem;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// Invocation target joining the price feed of one ticker and term
pub const JOIN_STOCK_PRICE_CHANGE: &str = "JoinStockPriceChange";
/// Invocation target joining a group feed
pub const JOIN_GROUP: &str = "JoinGroup";

const COMMAND_CHANNEL_DEPTH: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, HubError>>;

enum Command {
    Connect {
        info: Option<NegotiationInfo>,
        reply: Reply<()>,
    },
    Disconnect {
        error: Option<HubError>,
        reply: Reply<()>,
    },
    Invoke {
        target: String,
        arguments: Vec<Value>,
        reply: InvocationReply,
    },
    Send {
        message: ProtocolMessage,
        reply: Reply<()>,
    },
}

/// Completion of one asynchronous connect phase
enum Step {
    Negotiated(Result<NegotiationInfo, HubError>),
    Opened(Result<(TransportSink, TransportStream), HubError>),
}

/// Handle to the persistent broadcast channel
#[derive(Clone)]
pub struct HubConnection {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<HubEvent>,
    state: watch::Receiver<ConnectionState>,
}

impl HubConnection {
    /// Spawn the connection actor with explicit collaborators
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: HubConfig,
        transport: Arc<dyn Transport>,
        negotiator: Arc<dyn Negotiator>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_DEPTH);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let actor = ConnectionActor {
            tracker: InvocationTracker::new(config.invocation_timeout()),
            config,
            transport,
            negotiator,
            commands: command_rx,
            events: events.clone(),
            state_tx,
            state: ConnectionState::Idle,
            codec: HubCodec::new(),
            router: Router::new(),
            step: None,
            sink: None,
            stream: None,
            handshake_deadline: None,
            close_deadline: None,
            keepalive: None,
            connect_waiters: Vec::new(),
            close_waiters: Vec::new(),
            close_error: None,
            reconnect: None,
            deferred_disconnects: Vec::new(),
        };
        tokio::spawn(actor.run());

        Self {
            commands: command_tx,
            events,
            state: state_rx,
        }
    }

    /// Connection over WebSocket with HTTP negotiation against `config.hub_url`
    pub fn with_config(config: HubConfig) -> Result<Self, HubError> {
        config.validate()?;
        let transport = Arc::new(TungsteniteTransport::new(config.connect_timeout()));
        let negotiator = Arc::new(ReqwestNegotiator::new(
            config.hub_url.clone(),
            config.connect_timeout(),
        )?);
        Ok(Self::new(config, transport, negotiator))
    }

    /// Connect, negotiating a token first unless `info` is supplied
    ///
    /// Joins an attempt already in flight. While open, this performs a full
    /// reconnect cycle.
    pub async fn connect(&self, info: Option<NegotiationInfo>) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Connect { info, reply }, rx).await
    }

    /// Close the connection
    ///
    /// Cleanup always runs. When `error` is supplied the close still
    /// completes, and the call then fails with that error.
    pub async fn disconnect(&self, error: Option<HubError>) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Disconnect { error, reply }, rx).await
    }

    /// Call `target` and wait for its acknowledgement
    pub async fn invoke(
        &self,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Result<Option<Value>, HubError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Invoke {
            target: target.into(),
            arguments,
            reply,
        };
        self.request(command, rx).await
    }

    /// Join the price feed of `ticker` for one settlement term
    pub async fn subscribe_to_price_change(&self, ticker: &str, term: Term) -> Result<(), HubError> {
        self.invoke(
            JOIN_STOCK_PRICE_CHANGE,
            vec![Value::from(ticker), Value::from(term.code())],
        )
        .await
        .map(|_| ())
    }

    /// Join a group feed, e.g. `"merval"` or `("opciones", "GGAL")`
    pub async fn subscribe_to_group(
        &self,
        group: impl Into<GroupSubscription>,
    ) -> Result<(), HubError> {
        self.invoke(JOIN_GROUP, group.into().arguments())
            .await
            .map(|_| ())
    }

    /// Send a raw record without tracking; requires an attached transport
    pub async fn send(&self, message: ProtocolMessage) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send { message, reply }, rx).await
    }

    /// New receiver for every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    async fn request<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<Result<T, HubError>>,
    ) -> Result<T, HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::ConnectionDestroyed)?;
        rx.await.map_err(|_| HubError::ConnectionDestroyed)?
    }
}

struct ConnectionActor {
    config: HubConfig,
    transport: Arc<dyn Transport>,
    negotiator: Arc<dyn Negotiator>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<HubEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    codec: HubCodec<ProtocolMessage>,
    router: Router,
    tracker: InvocationTracker,
    /// Negotiation or transport open in progress
    step: Option<BoxFuture<'static, Step>>,
    sink: Option<TransportSink>,
    stream: Option<TransportStream>,
    handshake_deadline: Option<Instant>,
    close_deadline: Option<Instant>,
    keepalive: Option<Keepalive>,
    connect_waiters: Vec<Reply<()>>,
    close_waiters: Vec<Reply<()>>,
    /// Outcome shared by everyone waiting on the current close
    close_error: Option<HubError>,
    /// Connect to start once the current close completes
    reconnect: Option<Option<NegotiationInfo>>,
    /// Disconnects that arrived while a connect was in flight
    deferred_disconnects: Vec<(Option<HubError>, Reply<()>)>,
}

impl ConnectionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                step = next_step(&mut self.step) => {
                    self.step = None;
                    self.handle_step(step).await;
                }
                chunk = next_chunk(&mut self.stream) => self.handle_chunk(chunk).await,
                () = deadline(self.handshake_deadline) => {
                    self.fail_connect(HubError::HandshakeTimeout).await;
                }
                () = deadline(self.close_deadline) => {
                    warn!("transport did not close in time, dropping it");
                    self.finish_close();
                }
                Some(id) = self.tracker.expired() => {
                    warn!(invocation_id = %id, "invocation timed out");
                }
                Some(()) = next_tick(&mut self.keepalive) => self.send_ping().await,
            }
        }

        debug!("all hub handles dropped, shutting down");
        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { info, reply } => self.on_connect(info, reply).await,
            Command::Disconnect { error, reply } => self.on_disconnect(error, reply).await,
            Command::Invoke {
                target,
                arguments,
                reply,
            } => self.on_invoke(target, arguments, reply).await,
            Command::Send { message, reply } => {
                let result = if self.sink.is_some() {
                    self.send_record(&message).await
                } else {
                    Err(HubError::NotConnected)
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn on_connect(&mut self, info: Option<NegotiationInfo>, reply: Reply<()>) {
        self.connect_waiters.push(reply);

        match self.state {
            state if state.is_idle() => self.begin_connect(info),
            state if state.is_connecting() => {
                trace!(%state, "joining connect in flight");
            }
            ConnectionState::Open => {
                info!("reconnecting hub");
                self.reconnect = Some(info);
                self.begin_close(None).await;
            }
            _ => {
                // Closing: connect once the close completes
                if self.reconnect.is_none() {
                    self.reconnect = Some(info);
                }
            }
        }
    }

    async fn on_disconnect(&mut self, error: Option<HubError>, reply: Reply<()>) {
        match self.state {
            state if state.is_idle() => {
                let _ = reply.send(outcome(error.as_ref()));
            }
            ConnectionState::Open => {
                self.close_waiters.push(reply);
                self.begin_close(error).await;
            }
            ConnectionState::Closing if self.reconnect.is_none() => {
                if self.close_waiters.is_empty() && self.close_error.is_none() {
                    self.close_error = error;
                }
                self.close_waiters.push(reply);
            }
            // Connecting, or closing ahead of a reconnect
            _ => self.deferred_disconnects.push((error, reply)),
        }
    }

    async fn on_invoke(&mut self, target: String, arguments: Vec<Value>, reply: InvocationReply) {
        if self.state != ConnectionState::Open {
            let _ = reply.send(Err(HubError::NotConnected));
            return;
        }

        let id = self.tracker.next_id();
        let message = ProtocolMessage::invocation(id.clone(), target, arguments);
        match self.send_record(&message).await {
            Ok(()) => {
                trace!(invocation_id = %id, "invocation sent");
                self.tracker.register(id, reply);
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn begin_connect(&mut self, info: Option<NegotiationInfo>) {
        match info {
            Some(info) => self.begin_open(info),
            None => {
                self.set_state(ConnectionState::Negotiating);
                let negotiator = Arc::clone(&self.negotiator);
                self.step = Some(Box::pin(async move {
                    Step::Negotiated(negotiator.negotiate().await)
                }));
            }
        }
    }

    fn begin_open(&mut self, info: NegotiationInfo) {
        self.set_state(ConnectionState::Opening);
        let transport = Arc::clone(&self.transport);
        let url = transport_url(&self.config.hub_url, &info);
        self.step = Some(Box::pin(async move {
            let opened = match url {
                Ok(url) => transport.open(&url).await,
                Err(e) => Err(e),
            };
            Step::Opened(opened)
        }));
    }

    async fn handle_step(&mut self, step: Step) {
        match step {
            Step::Negotiated(Ok(info)) => self.begin_open(info),
            Step::Opened(Ok((sink, stream))) => {
                self.sink = Some(sink);
                self.stream = Some(stream);
                self.set_state(ConnectionState::Handshaking);

                if let Err(e) = self.send_record(&HandshakeRequest::default()).await {
                    self.fail_connect(e).await;
                    return;
                }
                self.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout());
            }
            Step::Negotiated(Err(e)) | Step::Opened(Err(e)) => self.fail_connect(e).await,
        }
    }

    async fn handle_chunk(&mut self, chunk: Option<Result<String, HubError>>) {
        match chunk {
            Some(Ok(text)) => {
                for record in self.codec.decode(&text) {
                    match record {
                        Ok(message) => self.dispatch(message).await,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed record");
                            self.emit(HubEvent::Error(e));
                        }
                    }
                    // A record may have torn the transport down; the rest belongs to it
                    if self.stream.is_none() {
                        break;
                    }
                }
            }
            Some(Err(e @ HubError::Decode(_))) => {
                warn!(error = %e, "dropping undecodable frame");
                self.emit(HubEvent::Error(e));
            }
            Some(Err(e)) => {
                warn!(error = %e, "transport error");
                self.emit(HubEvent::Error(e.clone()));
                self.on_transport_closed(e).await;
            }
            None => {
                self.on_transport_closed(HubError::TransportClosed(
                    "closed by remote peer".to_string(),
                ))
                .await;
            }
        }
    }

    async fn dispatch(&mut self, message: ProtocolMessage) {
        if self.state == ConnectionState::Handshaking {
            if message.is_handshake_ack() {
                match message.error {
                    Some(error) => self.fail_connect(HubError::RemoteError(error)).await,
                    None => self.complete_handshake().await,
                }
            } else if message.kind == Some(MessageKind::Close) {
                let error = message
                    .error
                    .unwrap_or_else(|| "closed during handshake".to_string());
                self.fail_connect(HubError::RemoteError(error)).await;
            } else {
                debug!(?message.kind, "ignoring record before handshake acknowledgement");
            }
            return;
        }

        self.emit(HubEvent::Message(message.clone()));

        match message.kind {
            Some(MessageKind::Completion) => {
                if !self.tracker.complete(&message) {
                    debug!(invocation_id = ?message.invocation_id, "acknowledgement without waiter");
                }
            }
            Some(MessageKind::Ping) => trace!("ping from hub"),
            Some(MessageKind::Close) => {
                let error = HubError::RemoteError(
                    message
                        .error
                        .unwrap_or_else(|| "connection closed by server".to_string()),
                );
                warn!(error = %error, "hub closed the connection");
                self.emit(HubEvent::Error(error));
                if self.state == ConnectionState::Open {
                    self.begin_close(None).await;
                }
            }
            _ if message.is_broadcast() => {
                for event in self.router.route(&message) {
                    self.emit(event);
                }
            }
            _ => trace!(?message.kind, "unhandled record"),
        }
    }

    async fn complete_handshake(&mut self) {
        self.handshake_deadline = None;
        self.tracker.reset();
        self.keepalive = Some(Keepalive::start(self.config.keepalive_interval()));
        self.set_state(ConnectionState::Open);
        info!("hub connection open");

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        self.emit(HubEvent::Connected);
        self.run_deferred_disconnects().await;
    }

    async fn fail_connect(&mut self, error: HubError) {
        warn!(error = %error, state = %self.state, "hub connect failed");
        self.step = None;
        self.handshake_deadline = None;
        self.keepalive = None;
        self.release_transport().await;
        self.tracker.reject_all(&HubError::ConnectionDestroyed);
        self.set_state(ConnectionState::Closed);

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        self.run_deferred_disconnects().await;
    }

    async fn run_deferred_disconnects(&mut self) {
        let deferred = mem::take(&mut self.deferred_disconnects);
        if deferred.is_empty() {
            return;
        }

        if self.state == ConnectionState::Open {
            let mut shared_error = None;
            for (error, reply) in deferred {
                if shared_error.is_none() {
                    shared_error = error;
                }
                self.close_waiters.push(reply);
            }
            self.begin_close(shared_error).await;
        } else {
            for (error, reply) in deferred {
                let _ = reply.send(outcome(error.as_ref()));
            }
        }
    }

    /// Leave Open: stop the timer and ask the transport to close
    async fn begin_close(&mut self, error: Option<HubError>) {
        self.set_state(ConnectionState::Closing);
        if self.close_error.is_none() {
            self.close_error = error;
        }
        self.keepalive = None;

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "transport close failed");
            }
        }
        self.close_deadline = Some(Instant::now() + self.config.close_timeout());
    }

    async fn on_transport_closed(&mut self, reason: HubError) {
        match self.state {
            ConnectionState::Handshaking => self.fail_connect(reason).await,
            ConnectionState::Open => {
                info!(reason = %reason, "hub transport closed unexpectedly");
                self.finish_close();
            }
            ConnectionState::Closing => self.finish_close(),
            _ => {
                self.sink = None;
                self.stream = None;
            }
        }
    }

    /// Terminal cleanup of an epoch; runs on every path into Closed
    fn finish_close(&mut self) {
        self.close_deadline = None;
        self.keepalive = None;
        self.sink = None;
        self.stream = None;
        self.tracker.reject_all(&HubError::ConnectionDestroyed);
        self.set_state(ConnectionState::Closed);
        info!("hub connection closed");
        self.emit(HubEvent::Disconnected);

        let close_error = self.close_error.take();
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(outcome(close_error.as_ref()));
        }

        if let Some(info) = self.reconnect.take() {
            self.begin_connect(info);
        }
    }

    async fn send_ping(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }
        if let Err(e) = self.send_record(&ProtocolMessage::ping()).await {
            debug!(error = %e, "keepalive ping failed");
        }
    }

    #[instrument(level = "trace", skip_all)]
    async fn send_record<T: Serialize + Sync>(&mut self, record: &T) -> Result<(), HubError> {
        let text = self.codec.encode(record)?;
        let sink = self.sink.as_mut().ok_or(HubError::NotConnected)?;
        sink.send(text).await
    }

    async fn release_transport(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
        self.stream = None;
    }

    async fn shutdown(&mut self) {
        self.step = None;
        self.handshake_deadline = None;
        self.close_deadline = None;
        self.keepalive = None;
        self.release_transport().await;
        self.tracker.reject_all(&HubError::ConnectionDestroyed);
        self.set_state(ConnectionState::Closed);

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(HubError::ConnectionDestroyed));
        }
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        for (error, reply) in self.deferred_disconnects.drain(..) {
            let _ = reply.send(outcome(error.as_ref()));
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            trace!(from = %self.state, to = %state, "state transition");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn emit(&self, event: HubEvent) {
        // No receivers is fine, events are best-effort
        let _ = self.events.send(event);
    }
}

fn outcome(error: Option<&HubError>) -> Result<(), HubError> {
    error.map_or(Ok(()), |e| Err(e.clone()))
}

async fn next_step(step: &mut Option<BoxFuture<'static, Step>>) -> Step {
    match step {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_chunk(stream: &mut Option<TransportStream>) -> Option<Result<String, HubError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn next_tick(keepalive: &mut Option<Keepalive>) -> Option<()> {
    match keepalive {
        Some(keepalive) => keepalive.tick().await,
        None => pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}
