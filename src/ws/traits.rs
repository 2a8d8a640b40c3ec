//! Seam between the session and the concrete transport.

use tokio::sync::mpsc;

use super::error::WsError;
use super::types::{Payload, SendOptions};

/// Lifecycle notification reported by a transport.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake completed
    Opened,
    /// Frame received
    Message(Payload),
    /// PONG received
    Pong,
    /// Connection closed with the given code
    Closed(u16),
    /// Transport-level failure
    Error(WsError),
    /// The server refused the handshake. No `Closed` follows.
    Rejected {
        /// HTTP status of the handshake response
        status: u16,
        /// Response body, lossily decoded
        body: String,
    },
}

/// Where a transport reports its [`TransportEvent`]s.
///
/// Each sink is tagged with the generation of the transport it was handed to, so the
/// session can drop notifications from transports it has already replaced.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns `false` once the session is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A single live duplex connection.
///
/// Commands must not block: implementations queue work for a background task and report
/// the outcome through the [`EventSink`] they were opened with.
pub trait Transport: Send + 'static {
    /// Queue a frame. A synchronous failure is re-injected by the session as an error.
    fn send(&mut self, payload: Payload, options: SendOptions) -> Result<(), WsError>;

    /// Queue a PING probe.
    fn ping(&mut self) -> Result<(), WsError>;

    /// Start the closing handshake. Idempotent.
    fn close(&mut self, code: u16, reason: &str);
}

/// Factory for transports.
pub trait Connector: Send + 'static {
    type Transport: Transport;

    /// Begin connecting to `address`. Must return immediately; the handshake outcome is
    /// reported through `sink` as [`TransportEvent::Opened`], [`TransportEvent::Rejected`]
    /// or an error followed by [`TransportEvent::Closed`].
    fn open(&mut self, address: &str, sink: EventSink) -> Self::Transport;
}
