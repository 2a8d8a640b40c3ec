use std::sync::Arc;

use super::error::WsError;

/// Application data carried by a frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Convert to a binary payload, leaving binary payloads untouched.
    #[must_use]
    pub fn into_binary(self) -> Self {
        match self {
            Self::Text(text) => Self::Binary(text.into_bytes()),
            binary @ Self::Binary(_) => binary,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Per-message send options.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Send as a binary frame even when the payload is text
    pub binary: bool,
}

impl SendOptions {
    #[must_use]
    pub const fn binary() -> Self {
        Self { binary: true }
    }
}

/// Notification delivered to session listeners.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A transport finished its opening handshake
    Opened,
    /// A frame arrived
    Message(Payload),
    /// A transport closed, whether or not the session will retry
    Closed(u16),
    /// A transport or send failure
    Errored(Arc<WsError>),
    /// The session stopped and will not retry
    Ended(u16),
    /// A scheduled retry is about to open a new transport
    Reconnecting,
}
