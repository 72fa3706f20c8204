//! Public control surface for the hit queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::Config;
use crate::core::dispatcher::Dispatcher;
use crate::core::entry::HitEntry;
use crate::core::error::QueueError;
use crate::core::observer::{QueueObserver, TracingObserver};
use crate::core::sender::HitSender;
use crate::core::store::{HitStore, JournalOptions, JournalStore};
use crate::util::backoff::{Backoff, RetryPolicy};

/// Lifecycle states of a [`HitQueue`].
///
/// `Closed` is terminal; every other transition is driven by
/// `begin_processing` and `suspend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Created,
    Processing,
    Suspended,
    Closed,
}

#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pub(crate) queued: AtomicU64,
    pub(crate) sent: AtomicU64,
    pub(crate) dropped: AtomicU64,
}

/// Durable, ordered, suspendable queue of outbound hits.
///
/// Owns the backing store and a single dispatcher task; the sender is
/// supplied by the caller and only ever invoked, never managed. All
/// methods are safe to call concurrently from any number of tasks.
pub struct HitQueue {
    store: Arc<dyn HitStore>,
    state: watch::Sender<QueueState>,
    wakeup: Arc<Notify>,
    observer: Arc<dyn QueueObserver>,
    counters: Arc<QueueCounters>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HitQueue {
    /// Build a queue around an explicit store, sender, retry policy and
    /// observer. Spawns the dispatcher task, so a tokio runtime must be
    /// running. The queue starts in `Created`: entries accumulate but are
    /// not sent until `begin_processing`.
    pub fn new(
        store: Arc<dyn HitStore>,
        sender: Arc<dyn HitSender>,
        policy: RetryPolicy,
        observer: Arc<dyn QueueObserver>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(QueueState::Created);
        let wakeup = Arc::new(Notify::new());
        let counters = Arc::new(QueueCounters::default());

        let dispatcher = Dispatcher {
            store: Arc::clone(&store),
            sender,
            observer: Arc::clone(&observer),
            state: state_rx,
            wakeup: Arc::clone(&wakeup),
            backoff: Backoff::new(policy),
            counters: Arc::clone(&counters),
        };
        let worker = tokio::spawn(dispatcher.run());

        Self {
            store,
            state: state_tx,
            wakeup,
            observer,
            counters,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Open a journal-backed queue from configuration, reporting through
    /// the default tracing observer.
    pub fn open(config: &Config, sender: Arc<dyn HitSender>) -> Result<Self, QueueError> {
        let store = JournalStore::open_with_options(
            config.store.journal_path(),
            JournalOptions {
                sync_on_write: config.store.sync_on_write,
                compact_min_tombstones: config.store.compact_min_tombstones,
            },
        )?;
        Ok(Self::new(
            Arc::new(store),
            sender,
            RetryPolicy::from(&config.retry),
            Arc::new(TracingObserver),
        ))
    }

    /// Durably append a hit.
    ///
    /// Returns once the entry is persisted; the network send happens later
    /// on the dispatcher task, so this never blocks on I/O to the
    /// collection endpoint. Rejects duplicate ids and a closed queue.
    pub fn queue(&self, hit: HitEntry) -> Result<(), QueueError> {
        if *self.state.borrow() == QueueState::Closed {
            return Err(QueueError::Closed);
        }
        self.store.append(hit)?;
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        self.wakeup.notify_one();
        Ok(())
    }

    /// Start (or resume) draining. Idempotent while already processing.
    pub fn begin_processing(&self) -> Result<(), QueueError> {
        let mut result = Ok(());
        let changed = self.state.send_if_modified(|state| match *state {
            QueueState::Closed => {
                result = Err(QueueError::Closed);
                false
            }
            QueueState::Processing => false,
            QueueState::Created | QueueState::Suspended => {
                *state = QueueState::Processing;
                true
            }
        });
        result?;
        if changed {
            self.observer.state_changed(QueueState::Processing);
            self.wakeup.notify_one();
        }
        Ok(())
    }

    /// Stop draining after the in-flight send (if any) completes. Entries
    /// keep accumulating while suspended. Idempotent.
    pub fn suspend(&self) -> Result<(), QueueError> {
        let mut result = Ok(());
        let changed = self.state.send_if_modified(|state| match *state {
            QueueState::Closed => {
                result = Err(QueueError::Closed);
                false
            }
            QueueState::Suspended => false,
            QueueState::Created | QueueState::Processing => {
                *state = QueueState::Suspended;
                true
            }
        });
        result?;
        if changed {
            self.observer.state_changed(QueueState::Suspended);
        }
        Ok(())
    }

    /// Remove every persisted entry, in any non-closed state. A hit already
    /// mid-send completes or fails on its own; its outcome cannot bring the
    /// cleared entries back.
    pub fn clear(&self) -> Result<(), QueueError> {
        if *self.state.borrow() == QueueState::Closed {
            return Err(QueueError::Closed);
        }
        self.store.clear()?;
        // Interrupts a backoff wait for an entry that no longer exists.
        self.wakeup.notify_one();
        Ok(())
    }

    /// Number of entries persisted and not yet successfully sent.
    /// Callable in every state, including after `close`.
    pub fn count(&self) -> usize {
        self.store.count()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QueueState {
        *self.state.borrow()
    }

    /// Stop the dispatcher and release the journal. Waits for an in-flight
    /// send to finish; a pending backoff wait is interrupted. Safe to call
    /// more than once.
    pub async fn close(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == QueueState::Closed {
                false
            } else {
                *state = QueueState::Closed;
                true
            }
        });
        if changed {
            self.observer.state_changed(QueueState::Closed);
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            self.wakeup.notify_one();
            if let Err(err) = worker.await {
                warn!("dispatcher task failed during close: {err}");
            }
            self.store.close();
        }
    }

    pub fn hits_queued_total(&self) -> u64 {
        self.counters.queued.load(Ordering::Relaxed)
    }

    pub fn hits_sent_total(&self) -> u64 {
        self.counters.sent.load(Ordering::Relaxed)
    }

    pub fn hits_dropped_total(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}
