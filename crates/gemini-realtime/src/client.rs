//! Connection lifecycle and outbound sends for a live session.

use crate::{
    config::{ReconnectPolicy, SessionConfig},
    dispatch::dispatch_frame,
    error::{ClientError, ProtocolError},
    events::{Event, EventBus, EventKind, Subscription},
    protocol::{ClientMessage, ToolResult},
    transport::{Channel, Connector, FrameSink, FrameStream, Message, TungsteniteConnector},
};
use futures_util::{
    FutureExt, SinkExt, StreamExt,
    future::{BoxFuture, Shared},
};
use secrecy::ExposeSecret;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, frame::coding::CloseCode};
use tracing::{debug, error, info, warn};

const NORMAL_CLOSURE: u16 = 1000;
const ABNORMAL_CLOSURE: u16 = 1006;
const NO_STATUS_RECEIVED: u16 = 1005;

/// Where the client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    Connecting,
    Open,
    /// Closed by either side or after a failed attempt. A reconnect may be pending.
    Closed,
}

type PendingConnect = Shared<BoxFuture<'static, Result<(), ClientError>>>;

struct State {
    phase: ConnectionState,
    attempts: u32,
    /// Bumped on every connect attempt and every disconnect. Readers, timers and
    /// in-flight attempts holding an older value are stale and must not act.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    pending: Option<PendingConnect>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Inner {
    session: SessionConfig,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    bus: EventBus,
    state: Mutex<State>,
}

/// A client for one live session.
///
/// Cloning is cheap; all clones drive the same connection. Methods that start
/// background work (`connect`, and reconnects after an abnormal closure) must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct LiveClient {
    inner: Arc<Inner>,
}

impl LiveClient {
    /// Creates a client that connects over WebSocket with the default reconnect policy.
    pub fn new(session: SessionConfig) -> Self {
        Self::with_connector(
            session,
            ReconnectPolicy::default(),
            Arc::new(TungsteniteConnector),
        )
    }

    pub fn with_connector(
        session: SessionConfig,
        policy: ReconnectPolicy,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                policy,
                connector,
                bus: EventBus::new(),
                state: Mutex::new(State {
                    phase: ConnectionState::Idle,
                    attempts: 0,
                    generation: 0,
                    outbound: None,
                    pending: None,
                    reader: None,
                    reconnect: None,
                }),
            }),
        }
    }

    pub fn session(&self) -> &SessionConfig {
        &self.inner.session
    }

    /// Registers a listener for one kind of event.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.bus.on(kind, listener)
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().phase
    }

    /// True iff the channel is open and its writer is still running.
    pub fn is_connected(&self) -> bool {
        let state = self.inner.lock();
        state.phase == ConnectionState::Open
            && state.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Opens the channel and sends the session setup.
    ///
    /// Returns immediately if already open. Concurrent calls while an attempt is
    /// in flight share its result. A failed attempt is published as
    /// [`Event::ConnectionError`] and is not retried.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.connect(false).await
    }

    /// Closes the channel with a normal closure and cancels any pending reconnect.
    ///
    /// Safe to call when already disconnected.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Sends a base64 PCM chunk. Empty input sends nothing and returns `false`.
    pub fn send_audio(&self, base64_audio: &str) -> bool {
        ClientMessage::audio(base64_audio).is_some_and(|message| self.send(&message))
    }

    /// Sends a base64 JPEG frame. Empty input sends nothing and returns `false`.
    pub fn send_image(&self, base64_image: &str) -> bool {
        ClientMessage::image(base64_image).is_some_and(|message| self.send(&message))
    }

    /// Sends a user text turn. Pass `end_of_turn = false` to keep the turn open.
    pub fn send_text(&self, text: &str, end_of_turn: bool) -> bool {
        self.send(&ClientMessage::text(text, end_of_turn))
    }

    /// Sends the result of a tool call.
    ///
    /// Fails with [`ClientError::InvalidArgument`] when `id` is empty or when
    /// neither `output` nor `error` is set. Otherwise returns whether the
    /// response was queued, like the other sends.
    pub fn send_tool_response(&self, result: ToolResult) -> Result<bool, ClientError> {
        let message = ClientMessage::tool_response(result)?;
        Ok(self.send(&message))
    }

    /// Queues `message` on the open channel as a binary JSON frame. Never fails loudly: a closed
    /// channel or an encoding failure is logged and reported as `false`.
    pub fn send(&self, message: &ClientMessage) -> bool {
        let outbound = {
            let state = self.inner.lock();
            match state.phase {
                ConnectionState::Open => state.outbound.clone(),
                _ => None,
            }
        };
        let Some(tx) = outbound else {
            warn!(client = %self.inner.session.name(), "Dropping outbound message: not connected");
            return false;
        };
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound message");
                return false;
            }
        };
        if tx.send(Message::Binary(payload.into())).is_err() {
            warn!(client = %self.inner.session.name(), "Dropping outbound message: writer has stopped");
            return false;
        }
        true
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect(self: &Arc<Self>, reconnecting: bool) -> Result<(), ClientError> {
        let attempt = {
            let mut state = self.lock();
            match (state.phase, state.pending.clone()) {
                (ConnectionState::Open, _) => return Ok(()),
                (ConnectionState::Connecting, Some(pending)) => pending,
                _ => self.start_attempt(&mut state, reconnecting),
            }
        };
        attempt.await
    }

    fn start_attempt(self: &Arc<Self>, state: &mut State, reconnecting: bool) -> PendingConnect {
        state.phase = ConnectionState::Connecting;
        state.generation += 1;
        let generation = state.generation;

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.establish(generation, reconnecting).await });
        let pending = async move { task.await.unwrap_or(Err(ClientError::Aborted)) }
            .boxed()
            .shared();
        state.pending = Some(pending.clone());
        pending
    }

    async fn establish(
        self: Arc<Self>,
        generation: u64,
        reconnecting: bool,
    ) -> Result<(), ClientError> {
        info!(client = %self.session.name(), reconnecting, "Opening live connection");
        let result = match self
            .connector
            .open(self.session.endpoint().expose_secret())
            .await
        {
            Ok(channel) => self.handshake(channel).await,
            Err(e) => Err(ClientError::Connection(Arc::new(e))),
        };
        match result {
            Ok(channel) => self.open(generation, channel).await,
            Err(e) => {
                self.fail(generation, e.clone(), reconnecting);
                Err(e)
            }
        }
    }

    /// Sends the setup message. It must be the first frame on every connection.
    async fn handshake(&self, mut channel: Channel) -> Result<Channel, ClientError> {
        let payload = serde_json::to_vec(&ClientMessage::setup(self.session.setup()))?;
        channel
            .sink
            .send(Message::Binary(payload.into()))
            .await
            .map_err(|e| ClientError::Handshake(Arc::new(e)))?;
        Ok(channel)
    }

    async fn open(self: Arc<Self>, generation: u64, channel: Channel) -> Result<(), ClientError> {
        let Channel { mut sink, stream } = channel;
        let (tx, rx) = mpsc::unbounded_channel();
        let current = {
            let mut state = self.lock();
            let current =
                state.generation == generation && state.phase == ConnectionState::Connecting;
            if current {
                state.phase = ConnectionState::Open;
                state.attempts = 0;
                state.outbound = Some(tx);
                state.pending = None;
                if let Some(timer) = state.reconnect.take() {
                    timer.abort();
                }
            }
            current
        };
        if !current {
            debug!(client = %self.session.name(), "Connection opened after disconnect; closing it");
            let _ = sink.send(normal_close()).await;
            let _ = sink.close().await;
            return Err(ClientError::Aborted);
        }

        tokio::spawn(write_loop(sink, rx));
        info!(client = %self.session.name(), "Live connection open");
        self.bus.emit(Event::Connected);

        let reader = tokio::spawn(Arc::clone(&self).read_loop(generation, stream));
        let mut state = self.lock();
        if state.generation == generation {
            state.reader = Some(reader);
        } else {
            reader.abort();
        }
        Ok(())
    }

    fn fail(self: &Arc<Self>, generation: u64, error: ClientError, reconnecting: bool) {
        let retry = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.phase = ConnectionState::Closed;
            state.pending = None;
            reconnecting.then(|| self.schedule_reconnect(&mut state))
        };
        warn!(client = %self.session.name(), error = %error, "Live connection attempt failed");
        self.bus.emit(Event::ConnectionError(error));
        match retry {
            Some(Some(delay)) => info!(?delay, "Retrying live connection"),
            Some(None) => self.report_exhausted(ABNORMAL_CLOSURE, "reconnect attempts failed"),
            None => {}
        }
    }

    async fn read_loop(self: Arc<Self>, generation: u64, mut stream: FrameStream) {
        let (code, reason) = loop {
            match stream.next().await {
                Some(Ok(Message::Binary(bytes))) => dispatch_frame(&bytes, &self.bus),
                Some(Ok(Message::Text(text))) => {
                    error!(
                        error = %ProtocolError::NonBinary,
                        len = text.len(),
                        "Dropping frame from live connection"
                    );
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or((NO_STATUS_RECEIVED, String::new()), |f| {
                        (u16::from(f.code), f.reason.to_string())
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Error reading from live connection");
                    break (ABNORMAL_CLOSURE, e.to_string());
                }
                None => break (ABNORMAL_CLOSURE, "connection dropped".to_string()),
            }
        };
        self.handle_close(generation, code, reason);
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        let reconnect = {
            let mut state = self.lock();
            if state.generation != generation {
                debug!(code, "Ignoring close of a stale connection");
                return;
            }
            state.phase = ConnectionState::Closed;
            state.outbound = None;
            state.reader = None;
            (code != NORMAL_CLOSURE).then(|| self.schedule_reconnect(&mut state))
        };

        match reconnect {
            Some(Some(delay)) => {
                warn!(code, %reason, ?delay, "Live connection closed abnormally; reconnecting");
            }
            Some(None) => {}
            None => info!(code, %reason, "Live connection closed"),
        }
        self.bus.emit(Event::Disconnected {
            code,
            reason: reason.clone(),
            reconnect_in: reconnect.flatten(),
        });
        if let Some(None) = reconnect {
            self.report_exhausted(code, &reason);
        }
    }

    /// Arms the reconnect timer if attempts remain. Returns the scheduled delay.
    fn schedule_reconnect(self: &Arc<Self>, state: &mut State) -> Option<Duration> {
        if state.attempts >= self.policy.max_attempts {
            return None;
        }
        state.attempts += 1;
        let delay = self.policy.delay_for(state.attempts);
        let generation = state.generation;
        let inner = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_reconnect(generation).await;
        });
        if let Some(stale) = state.reconnect.replace(timer) {
            stale.abort();
        }
        Some(delay)
    }

    async fn fire_reconnect(self: Arc<Self>, generation: u64) {
        let attempt = {
            let mut state = self.lock();
            if state.generation != generation || state.phase != ConnectionState::Closed {
                debug!("Ignoring stale reconnect timer");
                return;
            }
            // Detach without aborting; this task is the timer.
            state.reconnect.take();
            state.attempts
        };
        info!(client = %self.session.name(), attempt, "Reconnecting live connection");
        // Failures are published and rescheduled by `fail`.
        let _ = self.connect(true).await;
    }

    fn report_exhausted(&self, code: u16, reason: &str) {
        error!(
            client = %self.session.name(),
            max_attempts = self.policy.max_attempts,
            "Reconnect budget exhausted; call connect() to retry"
        );
        self.bus.emit(Event::ConnectionError(ClientError::TransportClosed {
            code,
            reason: reason.to_string(),
        }));
    }

    fn disconnect(&self) {
        let (outbound, reader, timer) = {
            let mut state = self.lock();
            state.attempts = self.policy.max_attempts;
            state.generation += 1;
            if state.phase != ConnectionState::Idle {
                state.phase = ConnectionState::Closed;
            }
            state.pending = None;
            (
                state.outbound.take(),
                state.reader.take(),
                state.reconnect.take(),
            )
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(reader) = reader {
            reader.abort();
        }
        if let Some(tx) = outbound {
            let _ = tx.send(normal_close());
            info!(client = %self.session.name(), "Live connection closed by client");
            self.bus.emit(Event::Disconnected {
                code: NORMAL_CLOSURE,
                reason: "client disconnect".to_string(),
                reconnect_in: None,
            });
        }
    }
}

fn normal_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }))
}

async fn write_loop(mut sink: FrameSink, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        let closing = message.is_close();
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "Failed to write to live connection");
            break;
        }
        if closing {
            break;
        }
    }
    drop(rx);
    let _ = sink.close().await;
}
