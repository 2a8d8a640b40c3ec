//! Liveness supervision via PING/PONG.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Sleep, sleep};

use super::config::Config;

/// What the liveness timer asks the session to do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Beat {
    /// Send a PING probe
    Probe,
    /// The probe went unanswered past the deadline
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitingPong,
}

/// Single-slot liveness timer: either counting down to the next probe or waiting for the
/// PONG answering the last one.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    ping_interval: Duration,
    pong_timeout: Option<Duration>,
    timer: Option<(Phase, Pin<Box<Sleep>>)>,
}

impl Heartbeat {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            ping_interval: config.ping_interval,
            pong_timeout: config
                .close_on_missed_pong
                .then_some(config.pong_timeout),
            timer: None,
        }
    }

    /// Start counting down to the next probe, replacing whatever was pending.
    pub(crate) fn arm(&mut self) {
        self.timer = Some((Phase::Idle, Box::pin(sleep(self.ping_interval))));
    }

    /// A PONG arrived: the link is alive.
    pub(crate) fn on_pong(&mut self) {
        self.arm();
    }

    pub(crate) fn cancel(&mut self) {
        self.timer = None;
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.timer.is_some()
    }

    /// Wait for the pending timer. Never resolves when nothing is pending.
    ///
    /// Cancel safe: the timer lives in `self`, so dropping this future loses nothing.
    pub(crate) async fn tick(&mut self) -> Beat {
        let Some((phase, timer)) = self.timer.as_mut() else {
            return future::pending().await;
        };
        let phase = *phase;
        timer.as_mut().await;

        match phase {
            Phase::Idle => {
                self.timer = self
                    .pong_timeout
                    .map(|timeout| (Phase::AwaitingPong, Box::pin(sleep(timeout))));
                Beat::Probe
            }
            Phase::AwaitingPong => {
                self.timer = None;
                Beat::Expired
            }
        }
    }
}
