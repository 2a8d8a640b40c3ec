#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the helpers"
)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reconnecting_socket::ws::config::{BudgetConfig, Config};
use reconnecting_socket::ws::{
    Connector, EventSink, Payload, SendOptions, Session, SessionEvent, Transport,
    TransportEvent, WsError,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, timeout};

/// Upper bound for anything a test waits on. Time is paused, so this only matters when an
/// expectation is not met.
pub const PATIENCE: Duration = Duration::from_secs(24 * 60 * 60);

/// Command a session issued to a scripted transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Sent(Payload, SendOptions),
    Ping,
    Close(u16, String),
}

/// In-memory transport that records commands.
#[derive(Debug)]
pub struct MockTransport {
    log: Arc<Mutex<Vec<Recorded>>>,
    fail_sends: bool,
}

impl Transport for MockTransport {
    fn send(&mut self, payload: Payload, options: SendOptions) -> Result<(), WsError> {
        if self.fail_sends {
            return Err(WsError::ConnectionClosed);
        }
        self.log
            .lock()
            .unwrap()
            .push(Recorded::Sent(payload, options));
        Ok(())
    }

    fn ping(&mut self) -> Result<(), WsError> {
        self.log.lock().unwrap().push(Recorded::Ping);
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        self.log
            .lock()
            .unwrap()
            .push(Recorded::Close(code, reason.to_owned()));
    }
}

/// Test-side view of one transport the session opened.
#[derive(Debug, Clone)]
pub struct MockLink {
    pub address: String,
    pub opened_at: Instant,
    sink: EventSink,
    log: Arc<Mutex<Vec<Recorded>>>,
}

impl MockLink {
    pub fn emit(&self, event: TransportEvent) {
        assert!(self.sink.emit(event), "session is gone");
    }

    pub fn open(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn close(&self, code: u16) {
        self.emit(TransportEvent::Closed(code));
    }

    pub fn message(&self, text: &str) {
        self.emit(TransportEvent::Message(Payload::from(text)));
    }

    pub fn pong(&self) {
        self.emit(TransportEvent::Pong);
    }

    pub fn reject(&self, status: u16, body: &str) {
        self.emit(TransportEvent::Rejected {
            status,
            body: body.to_owned(),
        });
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn pings(&self) -> usize {
        self.recorded()
            .iter()
            .filter(|r| **r == Recorded::Ping)
            .count()
    }
}

/// Connector that hands every transport it opens to the test.
pub struct MockConnector {
    links_tx: mpsc::UnboundedSender<MockLink>,
    fail_sends: bool,
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn open(&mut self, address: &str, sink: EventSink) -> Self::Transport {
        let log = Arc::new(Mutex::new(Vec::new()));
        drop(self.links_tx.send(MockLink {
            address: address.to_owned(),
            opened_at: Instant::now(),
            sink,
            log: Arc::clone(&log),
        }));

        MockTransport {
            log,
            fail_sends: self.fail_sends,
        }
    }
}

pub const ADDRESS: &str = "wss://stream.test/realtime";

/// A session over [`MockConnector`] plus the receivers a test needs.
pub struct Harness {
    pub session: Session,
    pub links: mpsc::UnboundedReceiver<MockLink>,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl Harness {
    pub fn start(config: Config) -> Self {
        Self::start_with(config, false)
    }

    pub fn start_with(config: Config, fail_sends: bool) -> Self {
        let (links_tx, links) = mpsc::unbounded_channel();
        let session = Session::new(
            MockConnector {
                links_tx,
                fail_sends,
            },
            config,
        )
        .unwrap();
        let events = session.subscribe();

        Self {
            session,
            links,
            events,
        }
    }

    /// Open [`ADDRESS`] and complete the handshake.
    pub async fn connected(config: Config) -> (Self, MockLink) {
        let mut harness = Self::start(config);
        harness.session.open(ADDRESS).unwrap();
        let link = harness.next_link().await;
        link.open();
        assert!(matches!(harness.next_event().await, SessionEvent::Opened));
        (harness, link)
    }

    pub async fn next_link(&mut self) -> MockLink {
        timeout(PATIENCE, self.links.recv())
            .await
            .expect("no transport was opened")
            .unwrap()
    }

    pub async fn next_event(&mut self) -> SessionEvent {
        timeout(PATIENCE, self.events.recv())
            .await
            .expect("no event was emitted")
            .unwrap()
    }

    /// Assert that no transport is opened for `period`.
    pub async fn assert_no_link_within(&mut self, period: Duration) {
        let link = timeout(period, self.links.recv()).await;
        assert!(link.is_err(), "unexpected transport: {link:?}");
    }

    /// Assert that no event is emitted for `period`.
    pub async fn assert_no_event_within(&mut self, period: Duration) {
        let event = timeout(period, self.events.recv()).await;
        assert!(event.is_err(), "unexpected event: {event:?}");
    }
}

/// Defaults with a budget that never refills, so long test timelines stay deterministic.
pub fn config() -> Config {
    Config::builder()
        .budget(BudgetConfig::builder().refill(false).build())
        .build()
}

pub fn assert_delay(from: Instant, to: Instant, expected: Duration) {
    let actual = to.duration_since(from);
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(5),
        "waited {actual:?}, expected {expected:?}"
    );
}
