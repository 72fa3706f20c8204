//! Retry backoff for the dispatcher.
//!
//! Retryable send failures are spaced out with an exponentially growing
//! delay so a struggling collection endpoint is not hammered. The delay is
//! capped, and drops back to the initial interval after any successful
//! send, so one stuck hit does not penalize the entries behind it once it
//! finally goes through or is dropped.

use std::time::Duration;

use crate::config::RetryConfig;

/// Parameters of the exponential retry curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry, and the value restored on success.
    pub initial: Duration,
    /// Upper bound on the delay between retries.
    pub max: Duration,
    /// Growth factor applied after each retryable failure.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            initial: Duration::from_millis(cfg.initial_delay_ms),
            max: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.multiplier.max(1),
        }
    }
}

/// Escalating delay tracker. One per dispatcher, never shared across hits.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    next: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            next: policy.initial,
            policy,
        }
    }

    /// Delay to wait before the next retry, escalating the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self
            .next
            .saturating_mul(self.policy.multiplier)
            .min(self.policy.max);
        delay
    }

    /// Drop back to the initial interval after a successful send.
    pub fn reset(&mut self) {
        self.next = self.policy.initial;
    }
}
