//! Reconnect policy: exponential backoff gated by a connection budget.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use tokio::time::Instant;

use super::config::{BudgetConfig, ReconnectConfig};

/// Delay chosen for the next reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryPlan {
    /// Budget available, wait the current backoff interval
    Backoff(Duration),
    /// Budget exhausted, wait for the deficit to refill
    Refill(Duration),
}

impl RetryPlan {
    pub(crate) const fn delay(self) -> Duration {
        match self {
            Self::Backoff(delay) | Self::Refill(delay) => delay,
        }
    }

    pub(crate) const fn is_exhausted(self) -> bool {
        matches!(self, Self::Refill(_))
    }
}

/// Point-in-time view of the reconnect policy.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicySnapshot {
    /// Interval the next budgeted retry will wait
    pub current_backoff: Duration,
    /// Tokens left in the connection budget; negative once overdrawn
    pub remaining: i64,
    /// Tokens left above the reserve
    pub available: i64,
}

/// Token count limiting how many reconnects may happen before a penalty wait.
#[derive(Debug)]
pub(crate) struct ConnectionBudget {
    capacity: i64,
    reserve: i64,
    refill_unit: Duration,
    refill: bool,
    remaining: i64,
    last_refill: Instant,
}

impl ConnectionBudget {
    pub(crate) fn new(config: &BudgetConfig, now: Instant) -> Self {
        Self {
            capacity: i64::from(config.capacity),
            reserve: i64::from(config.reserve),
            refill_unit: config.refill_unit,
            refill: config.refill,
            remaining: i64::from(config.capacity),
            last_refill: now,
        }
    }

    pub(crate) const fn remaining(&self) -> i64 {
        self.remaining
    }

    pub(crate) const fn available(&self) -> i64 {
        self.remaining.saturating_sub(self.reserve)
    }

    pub(crate) fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Credit one token per whole `refill_unit` elapsed since the last credit.
    pub(crate) fn refill(&mut self, now: Instant) {
        if !self.refill {
            return;
        }
        if self.remaining >= self.capacity {
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = elapsed.as_nanos() / self.refill_unit.as_nanos();
        if earned == 0 {
            return;
        }

        let earned = i64::try_from(earned).unwrap_or(i64::MAX);
        self.remaining = self.remaining.saturating_add(earned).min(self.capacity);

        let advance = u32::try_from(earned)
            .ok()
            .and_then(|n| self.refill_unit.checked_mul(n));
        match advance {
            Some(advance) if self.remaining < self.capacity => self.last_refill += advance,
            _ => self.last_refill = now,
        }
    }

    fn deficit_wait(&self, available: i64) -> Duration {
        let deficit = u32::try_from(available.unsigned_abs()).unwrap_or(u32::MAX);
        self.refill_unit.checked_mul(deficit).unwrap_or(Duration::MAX)
    }
}

/// Owns the backoff state and the connection budget, and decides how long to wait before
/// the next open.
#[derive(Debug)]
pub(crate) struct ReconnectController {
    backoff: ExponentialBackoff,
    budget: ConnectionBudget,
}

impl ReconnectController {
    pub(crate) fn new(reconnect: &ReconnectConfig, budget: &BudgetConfig, now: Instant) -> Self {
        Self {
            backoff: reconnect.clone().into(),
            budget: ConnectionBudget::new(budget, now),
        }
    }

    /// A transport opened: the next failure starts from the floor again.
    pub(crate) fn on_open(&mut self) {
        self.backoff.reset();
    }

    /// Override the interval used by the next budgeted retry, kept within floor and ceiling.
    pub(crate) fn force_interval(&mut self, interval: Duration) {
        self.backoff.current_interval =
            interval.clamp(self.backoff.initial_interval, self.backoff.max_interval);
    }

    /// Plan the retry for a retryable closure and spend one budget token.
    pub(crate) fn plan(&mut self, now: Instant) -> RetryPlan {
        self.budget.refill(now);

        let available = self.budget.available();
        let plan = if available > 0 {
            let delay = self
                .backoff
                .next_backoff()
                .unwrap_or(self.backoff.max_interval);
            RetryPlan::Backoff(delay)
        } else {
            RetryPlan::Refill(self.budget.deficit_wait(available))
        };

        self.budget.consume();
        plan
    }

    pub(crate) fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            current_backoff: self.backoff.current_interval,
            remaining: self.budget.remaining(),
            available: self.budget.available(),
        }
    }
}
