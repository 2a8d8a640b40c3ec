//! Keep a session to an echo server alive and watch it work.
//!
//! This example:
//! 1. Opens a session to the address given as the first argument
//! 2. Sends a few text and JSON frames and logs the echoes
//! 3. Logs every lifecycle event and the reconnect policy for a minute
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example echo -- wss://echo.websocket.org
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use reconnecting_socket::ws::config::Config;
use reconnecting_socket::ws::{SendOptions, Session, SessionEvent};
use serde_json::json;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

const DEFAULT_ADDRESS: &str = "wss://echo.websocket.org";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDRESS.to_owned());
    let config = Config::builder()
        .ping_interval(Duration::from_secs(15))
        .pong_timeout(Duration::from_secs(10))
        .build();

    let session = Session::connect(&address, config)?;
    info!(id = %session.id(), %address, "Session started");

    let mut events = session.subscribe();
    let mut messages = Box::pin(session.messages());

    session.send("hello", SendOptions::default())?;
    session.send("hello as bytes", SendOptions::binary())?;
    session.send_json(&json!({ "op": "ping", "args": [1, 2, 3] }))?;

    let mut count = 0;
    while let Ok(Some(result)) = timeout(Duration::from_secs(5), messages.next()).await {
        match result {
            Ok(payload) => {
                info!(stream = "messages", len = payload.len(), payload = ?payload);
                count += 1;
                if count >= 3 {
                    break;
                }
            }
            Err(e) => debug!(stream = "messages", error = %e),
        }
    }
    info!(stream = "messages", received = count);

    let deadline = Instant::now() + Duration::from_secs(60);
    while let Ok(event) = tokio::time::timeout_at(deadline, events.recv()).await {
        match event {
            Ok(SessionEvent::Ended(code)) => {
                warn!(code, "Session ended");
                break;
            }
            Ok(event) => {
                let policy = session.policy().await?;
                info!(
                    event = ?event,
                    state = ?session.state(),
                    backoff = ?policy.current_backoff,
                    budget = policy.remaining
                );
            }
            Err(e) => debug!(error = %e, "Event receiver lagged"),
        }
    }

    session.close()?;
    info!(state = ?session.state(), "Done");

    Ok(())
}
