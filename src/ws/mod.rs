//! Resilient WebSocket session.
//!
//! This module keeps one logical connection alive over any number of transport
//! failures. The session owns the resilience policy; a [`Connector`] supplies the
//! transports.
//!
//! # Architecture
//!
//! - [`Session`]: cloneable handle to a background event loop owning the transport,
//!   the reconnect timer and the liveness timer
//! - [`close`]: classification of close codes, handshake rejections and errors
//! - [`reconnect`]: exponential backoff gated by a connection budget
//! - [`Connector`] / [`Transport`]: the seam to the concrete transport, with
//!   [`tungstenite::TungsteniteConnector`] as the production implementation
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(TungsteniteConnector::default(), Config::default())?;
//! let mut events = session.subscribe();
//! session.open("wss://example.com/stream")?;
//! ```

pub mod close;
pub mod config;
pub mod error;
pub(crate) mod heartbeat;
pub mod reconnect;
pub mod session;
pub mod traits;
#[cfg(feature = "ws")]
pub mod tungstenite;
pub mod types;

#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use reconnect::PolicySnapshot;
pub use session::{ConnectionState, Session};
pub use traits::*;
pub use types::{Payload, SendOptions, SessionEvent};
