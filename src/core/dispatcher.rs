//! Background drain loop.
//!
//! One dispatcher task per queue facade. While the queue is `Processing`
//! it repeatedly peeks the oldest stored hit, hands it to the sender and
//! reacts to the outcome; otherwise it parks on the wakeup signal. An
//! in-flight send is never cancelled: suspension and shutdown take effect
//! between sends, and a backoff wait is interruptible by any state change
//! or by the failing entry leaving the store.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{watch, Notify};
use tokio::time::sleep;
use tracing::{debug, error};

use crate::core::observer::QueueObserver;
use crate::core::queue::{QueueCounters, QueueState};
use crate::core::sender::{HitSender, SendOutcome};
use crate::core::store::HitStore;
use crate::util::backoff::Backoff;

pub(crate) struct Dispatcher {
    pub(crate) store: Arc<dyn HitStore>,
    pub(crate) sender: Arc<dyn HitSender>,
    pub(crate) observer: Arc<dyn QueueObserver>,
    pub(crate) state: watch::Receiver<QueueState>,
    pub(crate) wakeup: Arc<Notify>,
    pub(crate) backoff: Backoff,
    pub(crate) counters: Arc<QueueCounters>,
}

impl Dispatcher {
    pub(crate) async fn run(self) {
        let Dispatcher {
            store,
            sender,
            observer,
            mut state,
            wakeup,
            mut backoff,
            counters,
        } = self;

        'main: loop {
            let current = *state.borrow();
            if current == QueueState::Closed {
                break;
            }

            let ready = current == QueueState::Processing && store.count() > 0;
            if !ready {
                tokio::select! {
                    _ = wakeup.notified() => {}
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            // Oldest first; `clear` may have emptied the store since the
            // count check.
            let Some(hit) = store.peek_oldest() else {
                continue;
            };

            match sender.send(&hit).await {
                SendOutcome::Delivered => {
                    backoff.reset();
                    match store.remove(hit.id) {
                        Ok(_) => {}
                        Err(err) => {
                            error!(id = %hit.id, "failed to journal hit removal: {err}");
                        }
                    }
                    counters.sent.fetch_add(1, Ordering::Relaxed);
                    observer.hit_sent(&hit);
                }
                SendOutcome::Retryable => {
                    let delay = backoff.next_delay();
                    debug!(
                        id = %hit.id,
                        delay_ms = delay.as_millis() as u64,
                        "retryable send failure, backing off"
                    );
                    let wait = sleep(delay);
                    tokio::pin!(wait);
                    loop {
                        tokio::select! {
                            _ = &mut wait => break,
                            _ = wakeup.notified() => {
                                // A wakeup cuts the wait short only when the
                                // head entry changed, which happens when
                                // `clear` removed the failing hit.
                                if store.peek_oldest().map(|h| h.id) != Some(hit.id) {
                                    break;
                                }
                            }
                            changed = state.changed() => {
                                if changed.is_err() {
                                    break 'main;
                                }
                                break;
                            }
                        }
                    }
                }
                SendOutcome::Rejected => {
                    backoff.reset();
                    match store.remove(hit.id) {
                        Ok(_) => {}
                        Err(err) => {
                            error!(id = %hit.id, "failed to journal hit removal: {err}");
                        }
                    }
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    observer.hit_dropped(&hit, "non-retryable send failure");
                }
            }
        }

        debug!("dispatcher stopped");
    }
}
