//! Classification of closures, handshake rejections and transport errors.

use strum_macros::Display;

use super::error::WsError;

/// Orderly shutdown requested by either side.
pub const CLOSE_NORMAL: u16 = 1000;
/// Used when the session abandons a transport it no longer trusts.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close frame without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Recognized unexpected closure; never retried.
pub const CLOSE_UNEXPECTED: u16 = 1011;
/// Server downtime, retried soon.
pub const CLOSE_DOWNTIME: u16 = 1012;

/// Disposition of a closure.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CloseOutcome {
    /// Orderly shutdown, no retry
    Normal,
    /// Unrecoverable, the session ends
    Terminal,
    /// Transient, the session reconnects
    Retryable,
}

impl CloseOutcome {
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}

/// Classify a close code.
#[must_use]
pub const fn classify(code: u16) -> CloseOutcome {
    match code {
        CLOSE_NORMAL => CloseOutcome::Normal,
        CLOSE_UNEXPECTED => CloseOutcome::Terminal,
        _ => CloseOutcome::Retryable,
    }
}

/// Reason a server refused the opening handshake.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Rejection {
    /// 401, credentials were not accepted
    Unauthorized,
    /// 502 or 503, the server is temporarily unavailable
    Downtime,
    /// Any other status
    Unexpected,
}

impl Rejection {
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            502 | 503 => Self::Downtime,
            _ => Self::Unexpected,
        }
    }

    /// Close code synthesized for this rejection.
    #[must_use]
    pub const fn close_code(self) -> u16 {
        match self {
            Self::Downtime => CLOSE_DOWNTIME,
            Self::Unauthorized | Self::Unexpected => CLOSE_UNEXPECTED,
        }
    }
}

/// Whether a transport error should reach the application at all.
///
/// Refused connections are swallowed: the closure that accompanies them drives the retry.
#[must_use]
pub fn is_suppressed(error: &WsError) -> bool {
    error.is_connection_refused()
}
