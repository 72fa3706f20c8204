use async_trait::async_trait;

use crate::core::entry::HitEntry;

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The hit was accepted by the receiving service.
    Delivered,
    /// Transient failure (network error, timeout, 5xx). The same hit will
    /// be retried after a backoff interval; newer hits wait behind it.
    Retryable,
    /// Permanent rejection (malformed request, 4xx). The hit is dropped and
    /// reported to the observer, never retried.
    Rejected,
}

/// Pluggable network transport, invoked for one hit at a time.
///
/// Implementations own transport concerns end to end: connection handling,
/// authentication, response-code interpretation and the per-attempt
/// timeout. A timed-out attempt should be reported as
/// [`SendOutcome::Retryable`].
///
/// Delivery is at-least-once: a crash between a successful send and the
/// journal removal redelivers the same hit on restart, so the receiving
/// side must tolerate duplicates.
#[async_trait]
pub trait HitSender: Send + Sync {
    async fn send(&self, hit: &HitEntry) -> SendOutcome;
}
