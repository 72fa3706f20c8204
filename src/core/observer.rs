use tracing::{debug, info, warn};

use crate::core::entry::HitEntry;
use crate::core::queue::QueueState;

/// Diagnostic sink for queue lifecycle transitions and delivery outcomes.
///
/// Purely an output channel; nothing reported here feeds back into
/// dispatch decisions.
pub trait QueueObserver: Send + Sync {
    fn state_changed(&self, _state: QueueState) {}
    fn hit_sent(&self, _hit: &HitEntry) {}
    fn hit_dropped(&self, _hit: &HitEntry, _reason: &str) {}
}

/// Default observer that reports through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl QueueObserver for TracingObserver {
    fn state_changed(&self, state: QueueState) {
        info!(?state, "hit queue state changed");
    }

    fn hit_sent(&self, hit: &HitEntry) {
        debug!(id = %hit.id, "hit delivered");
    }

    fn hit_dropped(&self, hit: &HitEntry, reason: &str) {
        warn!(id = %hit.id, reason, "hit dropped");
    }
}
