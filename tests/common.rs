use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use hitqueue::{HitEntry, HitSender, QueueObserver, QueueState, RetryPolicy, SendOutcome};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        hitqueue::logging::init_logging();
    });
}

/// Short retry curve so failure-path tests finish quickly.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        initial: Duration::from_millis(20),
        max: Duration::from_millis(80),
        multiplier: 2,
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Sender double that records every attempt and plays back scripted
/// outcomes per payload. Unscripted attempts are delivered.
#[derive(Default)]
pub struct ScriptedSender {
    outcomes: Mutex<HashMap<Vec<u8>, VecDeque<SendOutcome>>>,
    calls: Mutex<Vec<(Vec<u8>, Instant)>>,
}

impl ScriptedSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, payload: &[u8], outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.outcomes
            .lock()
            .entry(payload.to_vec())
            .or_default()
            .extend(outcomes);
    }

    pub fn calls(&self) -> Vec<Vec<u8>> {
        self.calls.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn attempt_times(&self, payload: &[u8]) -> Vec<Instant> {
        self.calls
            .lock()
            .iter()
            .filter(|(p, _)| p == payload)
            .map(|(_, t)| *t)
            .collect()
    }
}

#[async_trait]
impl HitSender for ScriptedSender {
    async fn send(&self, hit: &HitEntry) -> SendOutcome {
        self.calls
            .lock()
            .push((hit.payload.to_vec(), Instant::now()));
        self.outcomes
            .lock()
            .get_mut(hit.payload.as_ref())
            .and_then(|queued| queued.pop_front())
            .unwrap_or(SendOutcome::Delivered)
    }
}

/// Sender double that parks each attempt until the test releases it, for
/// exercising in-flight-send semantics.
pub struct GatedSender {
    gate: Semaphore,
    in_flight: AtomicUsize,
    delivered: AtomicUsize,
}

impl GatedSender {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, attempts: usize) {
        self.gate.add_permits(attempts);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HitSender for GatedSender {
    async fn send(&self, _hit: &HitEntry) -> SendOutcome {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.delivered.fetch_add(1, Ordering::SeqCst);
        SendOutcome::Delivered
    }
}

/// Observer double counting delivery outcomes and state transitions.
#[derive(Default)]
pub struct CountingObserver {
    pub sent: AtomicUsize,
    pub dropped: AtomicUsize,
    pub transitions: Mutex<Vec<QueueState>>,
}

impl QueueObserver for CountingObserver {
    fn state_changed(&self, state: QueueState) {
        self.transitions.lock().push(state);
    }

    fn hit_sent(&self, _hit: &HitEntry) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn hit_dropped(&self, _hit: &HitEntry, _reason: &str) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}
