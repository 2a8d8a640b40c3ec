#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::{fmt, io};

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    #[cfg(feature = "ws")]
    Connection(tokio_tungstenite::tungstenite::Error),
    /// I/O failure underneath the transport
    Io(io::Error),
    /// No transport is currently open
    NotConnected,
    /// WebSocket connection was closed
    ConnectionClosed,
    /// No PONG arrived before the liveness deadline
    HeartbeatTimeout,
    /// Event stream lagged and missed notifications
    Lagged {
        /// Number of notifications that were missed
        count: u64,
    },
}

impl WsError {
    /// Whether the root cause is a refused TCP connection.
    #[must_use]
    pub fn is_connection_refused(&self) -> bool {
        match self {
            Self::Io(e) => e.kind() == io::ErrorKind::ConnectionRefused,
            #[cfg(feature = "ws")]
            Self::Connection(tokio_tungstenite::tungstenite::Error::Io(e)) => {
                e.kind() == io::ErrorKind::ConnectionRefused
            }
            _ => false,
        }
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "ws")]
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::Io(e) => write!(f, "WebSocket I/O error: {e}"),
            Self::NotConnected => write!(f, "WebSocket is not connected"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::HeartbeatTimeout => write!(f, "WebSocket heartbeat timed out"),
            Self::Lagged { count } => write!(f, "Event stream lagged, missed {count} events"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            #[cfg(feature = "ws")]
            Self::Connection(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "ws")]
impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        match e {
            tokio_tungstenite::tungstenite::Error::Io(io) => Self::Io(io),
            other => Self::Connection(other),
        }
    }
}

impl From<io::Error> for WsError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

#[cfg(feature = "ws")]
impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::from(e))
    }
}
