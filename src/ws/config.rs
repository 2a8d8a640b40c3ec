#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;
use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};

use crate::Result;
use crate::error::Error;

const DEFAULT_PING_INTERVAL_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_PONG_TIMEOUT_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_DOWNTIME_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_BUDGET_CAPACITY: u32 = 40;
const DEFAULT_BUDGET_RESERVE: u32 = 10;
const DEFAULT_REFILL_UNIT_DURATION: Duration = Duration::from_secs(90);
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for a [`Session`](crate::ws::Session).
///
/// Durations deserialize from integer milliseconds, and every field may be omitted:
///
/// ```
/// use reconnecting_socket::ws::config::Config;
///
/// let config: Config = serde_json::from_str(r#"{ "ping_interval": 15000 }"#).unwrap();
/// assert_eq!(config.ping_interval.as_secs(), 15);
/// assert_eq!(config.budget.capacity, 40);
/// ```
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Builder, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Idle time after an open or a PONG before a PING probe is sent
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = DEFAULT_PING_INTERVAL_DURATION)]
    pub ping_interval: Duration,
    /// Maximum time to wait for PONG once a probe is out
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = DEFAULT_PONG_TIMEOUT_DURATION)]
    pub pong_timeout: Duration,
    /// Treat a missed PONG as an abnormal closure. When `false` an unanswered probe only
    /// stops further probing and death is left to the transport's own notifications.
    #[builder(default = true)]
    pub close_on_missed_pong: bool,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Connection-rate budget configuration
    #[builder(default)]
    pub budget: BudgetConfig,
    /// Emit informational connection logs
    #[builder(default = true)]
    pub log_connection: bool,
    /// Capacity of the broadcast channel carrying session events
    #[builder(default = DEFAULT_EVENT_CAPACITY)]
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Reject settings the session cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.ping_interval.is_zero() {
            return Err(Error::validation("ping_interval must be non-zero"));
        }
        if self.close_on_missed_pong && self.pong_timeout.is_zero() {
            return Err(Error::validation("pong_timeout must be non-zero"));
        }
        if self.event_capacity == 0 {
            return Err(Error::validation("event_capacity must be non-zero"));
        }
        self.reconnect.validate()?;
        self.budget.validate()
    }
}

/// Configuration for automatic reconnection behavior.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Builder, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Initial backoff duration, restored after every successful open
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = DEFAULT_INITIAL_BACKOFF_DURATION)]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = DEFAULT_MAX_BACKOFF_DURATION)]
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: f64,
    /// Backoff forced after the server rejects the handshake with 502 or 503
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = DEFAULT_DOWNTIME_INTERVAL_DURATION)]
    pub downtime_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_backoff.is_zero() {
            return Err(Error::validation("initial_backoff must be non-zero"));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(Error::validation(format!(
                "max_backoff {:?} is below initial_backoff {:?}",
                self.max_backoff, self.initial_backoff
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::validation(format!(
                "backoff_multiplier {} must be a finite value >= 1",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None) // The budget bounds retries, not wall time
            .build()
    }
}

/// Configuration for the connection-rate budget.
///
/// Each scheduled reconnect spends one token. While more than `reserve` tokens remain the
/// session retries on the exponential backoff; past that point it waits `refill_unit` for
/// every token of deficit.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Builder, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Tokens available when the session is created
    #[builder(default = DEFAULT_BUDGET_CAPACITY)]
    pub capacity: u32,
    /// Tokens held back before the penalty wait applies
    #[builder(default = DEFAULT_BUDGET_RESERVE)]
    pub reserve: u32,
    /// Time to earn back one token
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = DEFAULT_REFILL_UNIT_DURATION)]
    pub refill_unit: Duration,
    /// Restore tokens as time passes. When `false` the budget only ever shrinks and waits
    /// grow with every further reconnect.
    #[builder(default = true)]
    pub refill: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BudgetConfig {
    fn validate(&self) -> Result<()> {
        if self.refill_unit.is_zero() {
            return Err(Error::validation("refill_unit must be non-zero"));
        }
        Ok(())
    }
}
