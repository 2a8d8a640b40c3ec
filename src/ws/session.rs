use std::future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::try_stream;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Sleep, sleep};
use tracing::Instrument as _;
use url::Url;
use uuid::Uuid;

use super::close::{
    self, CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_UNEXPECTED, CloseOutcome,
    Rejection,
};
use super::config::Config;
use super::error::WsError;
use super::heartbeat::{Beat, Heartbeat};
use super::reconnect::{PolicySnapshot, ReconnectController};
use super::traits::{Connector, EventSink, Transport as _, TransportEvent};
use super::types::{Payload, SendOptions, SessionEvent};
use crate::Result;
use crate::error::Error;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and no retry pending
    Idle,
    /// Waiting for a transport to finish its handshake
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// A retry is scheduled on the backoff
    AwaitingRetry {
        /// Delay before the retry
        delay: Duration,
    },
    /// The connection budget is spent and a refill wait is scheduled
    Exhausted {
        /// Delay before the retry
        wait: Duration,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if a reconnect is pending.
    #[must_use]
    pub const fn is_retrying(self) -> bool {
        matches!(self, Self::AwaitingRetry { .. } | Self::Exhausted { .. })
    }
}

#[derive(Debug)]
enum Command {
    Open(String),
    Send(Payload, SendOptions),
    Close,
    Policy(oneshot::Sender<PolicySnapshot>),
}

/// A durable connection to one endpoint.
///
/// The session survives any number of transport failures: closures are classified, retryable
/// ones are retried under exponential backoff and a connection budget, and idle links are
/// probed with PINGs. All of this runs on a single background task per session; the handle
/// is cheap to clone and the task stops once every handle is dropped.
///
/// # Example
///
/// ```rust, no_run
/// use reconnecting_socket::ws::{Session, SessionEvent};
/// use reconnecting_socket::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> reconnecting_socket::Result<()> {
///     let session = Session::connect("wss://echo.example.com", Config::default())?;
///     let mut events = session.subscribe();
///
///     session.send("hello", Default::default())?;
///     while let Ok(event) = events.recv().await {
///         if let SessionEvent::Ended(code) = event {
///             println!("session ended with {code}");
///             break;
///         }
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Session {
    id: Uuid,
    command_tx: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<SessionEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Session {
    /// Create a session over `connector` and start its event loop.
    ///
    /// Nothing is opened until [`Session::open`] is called. Must be called within a tokio
    /// runtime.
    pub fn new<C: Connector>(connector: C, config: Config) -> Result<Self> {
        let id = Uuid::new_v4();
        Self::start(id, connector, config, tracing::info_span!("session", %id))
    }

    /// Like [`Session::new`], logging under the given span instead of a fresh one.
    pub fn with_span<C: Connector>(
        connector: C,
        config: Config,
        span: tracing::Span,
    ) -> Result<Self> {
        Self::start(Uuid::new_v4(), connector, config, span)
    }

    /// Create a session over the tungstenite transport and open `address`.
    #[cfg(feature = "ws")]
    pub fn connect(address: &str, config: Config) -> Result<Self> {
        let session = Self::new(super::tungstenite::TungsteniteConnector, config)?;
        session.open(address)?;
        Ok(session)
    }

    fn start<C: Connector>(
        id: Uuid,
        connector: C,
        config: Config,
        span: tracing::Span,
    ) -> Result<Self> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let task = SessionTask::new(connector, config, command_rx, event_tx.clone(), state_tx);
        tokio::spawn(task.run().instrument(span));

        Ok(Self {
            id,
            command_tx,
            event_tx,
            state_rx,
        })
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Open a new transport to `address`, replacing the current one and cancelling any
    /// pending retry. The address is remembered for reconnects.
    pub fn open(&self, address: &str) -> Result<()> {
        Url::parse(address)?;
        self.command(Command::Open(address.to_owned()))
    }

    /// Queue a frame on the current transport.
    ///
    /// Transport failures are reported as [`SessionEvent::Errored`], not returned; this only
    /// fails once the session task is gone.
    pub fn send<P: Into<Payload>>(&self, payload: P, options: SendOptions) -> Result<()> {
        self.command(Command::Send(payload.into(), options))
    }

    /// Serialize `request` to JSON and queue it as a text frame.
    pub fn send_json<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.send(json, SendOptions::default())
    }

    /// Close the current transport normally and cancel every pending timer.
    ///
    /// The session stays usable and may be opened again.
    pub fn close(&self) -> Result<()> {
        self.command(Command::Close)
    }

    /// Subscribe to session events.
    ///
    /// Each call returns a new independent receiver; dropping it unregisters the listener.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Stream of received payloads across all reconnects.
    pub fn messages(&self) -> impl Stream<Item = Result<Payload>> + use<> {
        let mut rx = self.event_tx.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::Message(payload)) => yield payload,
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Session message stream lagged, missed {n} events");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Current backoff interval and connection budget.
    pub async fn policy(&self) -> Result<PolicySnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Policy(tx))?;
        rx.await.map_err(|_e| Error::shutdown())
    }

    fn command(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_e| Error::shutdown())
    }
}

/// State owned by the session's event loop.
struct SessionTask<C: Connector> {
    config: Config,
    connector: C,
    address: Option<String>,
    transport: Option<C::Transport>,
    /// Generation of the live transport; bumped on every open and retirement
    generation: u64,
    sink_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    sink_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    controller: ReconnectController,
    heartbeat: Heartbeat,
    retry: Option<Pin<Box<Sleep>>>,
}

impl<C: Connector> SessionTask<C> {
    fn new(
        connector: C,
        config: Config,
        command_rx: mpsc::UnboundedReceiver<Command>,
        event_tx: broadcast::Sender<SessionEvent>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let controller = ReconnectController::new(
            &config.reconnect,
            &config.budget,
            tokio::time::Instant::now(),
        );
        let heartbeat = Heartbeat::new(&config);

        Self {
            config,
            connector,
            address: None,
            transport: None,
            generation: 0,
            sink_tx,
            sink_rx,
            command_rx,
            event_tx,
            state_tx,
            controller,
            heartbeat,
            retry: None,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command);
                }

                Some((generation, event)) = self.sink_rx.recv() => {
                    if generation == self.generation {
                        self.handle_event(event);
                    } else {
                        tracing::trace!(generation, ?event, "Dropping event from retired transport");
                    }
                }

                () = fire(&mut self.retry) => {
                    self.retry = None;
                    self.reconnect_now();
                }

                beat = self.heartbeat.tick() => {
                    self.handle_beat(beat);
                }
            }
        }

        // Every handle is gone
        self.retry = None;
        self.heartbeat.cancel();
        self.retire(CLOSE_NORMAL, "Session dropped.");
        self.set_state(ConnectionState::Idle);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open(address) => {
                self.retry = None;
                self.open(address);
            }
            Command::Send(payload, options) => {
                tracing::trace!(len = payload.len(), binary = options.binary, "Sending frame");
                let result = match self.transport.as_mut() {
                    Some(transport) => transport.send(payload, options),
                    None => Err(WsError::NotConnected),
                };
                if let Err(e) = result {
                    self.handle_error(e);
                }
            }
            Command::Close => self.close(),
            Command::Policy(tx) => {
                _ = tx.send(self.controller.snapshot());
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.handle_open(),
            TransportEvent::Message(payload) => self.emit(SessionEvent::Message(payload)),
            TransportEvent::Pong => {
                tracing::trace!("PONG received");
                self.heartbeat.on_pong();
            }
            TransportEvent::Closed(code) => self.handle_close(code),
            TransportEvent::Error(e) => self.handle_error(e),
            TransportEvent::Rejected { status, body } => self.handle_rejection(status, &body),
        }
    }

    fn open(&mut self, address: String) {
        self.heartbeat.cancel();
        self.retire(CLOSE_NORMAL, "Reopening.");

        self.generation = self.generation.wrapping_add(1);
        let sink = EventSink::new(self.generation, self.sink_tx.clone());
        tracing::debug!(%address, generation = self.generation, "Opening transport");

        self.set_state(ConnectionState::Connecting);
        self.transport = Some(self.connector.open(&address, sink));
        self.address = Some(address);
    }

    /// Close and detach the current transport; anything it reports afterwards is ignored.
    fn retire(&mut self, code: u16, reason: &str) {
        if let Some(mut transport) = self.transport.take() {
            transport.close(code, reason);
        }
        self.generation = self.generation.wrapping_add(1);
    }

    fn handle_open(&mut self) {
        self.controller.on_open();
        if self.config.log_connection {
            tracing::info!(address = self.address.as_deref(), "WebSocket connected");
        }
        self.set_state(ConnectionState::Connected {
            since: Instant::now(),
        });
        self.emit(SessionEvent::Opened);
        self.heartbeat.arm();
    }

    fn handle_close(&mut self, code: u16) {
        self.heartbeat.cancel();

        let outcome = close::classify(code);
        match outcome {
            CloseOutcome::Normal => tracing::debug!(code, "WebSocket closed normally"),
            CloseOutcome::Terminal => tracing::error!(code, "WebSocket closed unexpectedly"),
            CloseOutcome::Retryable => tracing::error!(code, "WebSocket closed with code {code}"),
        }

        self.emit(SessionEvent::Closed(code));

        if outcome.is_retryable() {
            self.schedule_reconnect();
        } else {
            self.retry = None;
            self.emit(SessionEvent::Ended(code));
            self.retire(CLOSE_NORMAL, "Session ended.");
            self.set_state(ConnectionState::Idle);
        }
    }

    fn handle_error(&mut self, error: WsError) {
        if close::is_suppressed(&error) {
            tracing::debug!(error = %error, "Connection refused");
            return;
        }

        tracing::error!(error = %error, "Error on connection");
        self.emit(SessionEvent::Errored(Arc::new(error)));
    }

    fn handle_rejection(&mut self, status: u16, body: &str) {
        let rejection = Rejection::from_status(status);
        match rejection {
            Rejection::Unauthorized => tracing::error!(
                status,
                %body,
                "Authentication invalid. Please check your credentials"
            ),
            Rejection::Downtime => {
                tracing::error!(status, %body, "Server unavailable, will retry soon");
                self.controller
                    .force_interval(self.config.reconnect.downtime_interval);
            }
            Rejection::Unexpected => {
                tracing::error!(status, %body, "Unexpected response from server");
            }
        }

        let code = rejection.close_code();
        if code == CLOSE_UNEXPECTED && self.config.log_connection {
            tracing::info!("The WebSocket will terminate. Please manually reconnect");
        }

        self.retire(code, "Handshake rejected.");
        self.handle_close(code);
    }

    fn handle_beat(&mut self, beat: Beat) {
        match beat {
            Beat::Probe => {
                let result = match self.transport.as_mut() {
                    Some(transport) => transport.ping(),
                    None => return,
                };
                tracing::trace!("PING sent");
                if let Err(e) = result {
                    self.handle_error(e);
                }
            }
            Beat::Expired => {
                tracing::warn!(
                    "Heartbeat timeout: no PONG received within {:?}",
                    self.config.pong_timeout
                );
                self.retire(CLOSE_GOING_AWAY, "Liveness timeout.");
                self.emit(SessionEvent::Errored(Arc::new(WsError::HeartbeatTimeout)));
                self.handle_close(CLOSE_ABNORMAL);
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        self.retry = None;

        let remaining = self.controller.snapshot().remaining;
        let plan = self.controller.plan(tokio::time::Instant::now());
        let delay = plan.delay();
        tracing::info!(remaining, "Connection budget remaining: {remaining}");

        if plan.is_exhausted() {
            tracing::warn!(?delay, "Connection budget exhausted, retry in {delay:?}");
            self.set_state(ConnectionState::Exhausted { wait: delay });
        } else {
            tracing::info!(?delay, "Retry in {delay:?}");
            self.set_state(ConnectionState::AwaitingRetry { delay });
        }

        self.retry = Some(Box::pin(sleep(delay)));
    }

    fn reconnect_now(&mut self) {
        self.emit(SessionEvent::Reconnecting);
        self.retire(CLOSE_NORMAL, "Reconnecting.");

        let Some(address) = self.address.clone() else {
            self.set_state(ConnectionState::Idle);
            return;
        };
        if self.config.log_connection {
            tracing::info!("Reconnecting...");
        }
        self.open(address);
    }

    fn close(&mut self) {
        self.retry = None;
        self.heartbeat.cancel();

        let was_open = self.transport.is_some();
        self.retire(CLOSE_NORMAL, "Session closed.");
        self.set_state(ConnectionState::Idle);

        if was_open {
            if self.config.log_connection {
                tracing::info!("WebSocket closed by application");
            }
            self.emit(SessionEvent::Closed(CLOSE_NORMAL));
            self.emit(SessionEvent::Ended(CLOSE_NORMAL));
        }
    }

    fn emit(&self, event: SessionEvent) {
        _ = self.event_tx.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

/// Resolve when `timer` fires; never when it is unset.
async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => future::pending().await,
    }
}
