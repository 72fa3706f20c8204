//! hitqueue – a durable, ordered, suspendable queue for outbound telemetry hits.
//!
//! This crate exports
//!  * `core`   – hit entries, the journal-backed store, dispatcher and facade
//!  * `config` – TOML-driven runtime configuration
//!  * `util`   – retry backoff policy
//!
//! Downstream applications wrap their network transport in a [`HitSender`],
//! hand it to a [`HitQueue`], and drive the queue through
//! `begin_processing` / `suspend` / `clear` / `close`. Persisted hits
//! survive process restarts and are delivered at-least-once, oldest first.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod logging;
pub mod util;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use crate::config::{load_config, Config, RetryConfig, StoreConfig};
pub use crate::core::entry::{new_hit, with_custom_hit, HitEntry, HitId};
pub use crate::core::error::{QueueError, StoreError};
pub use crate::core::observer::{QueueObserver, TracingObserver};
pub use crate::core::queue::{HitQueue, QueueState};
pub use crate::core::sender::{HitSender, SendOutcome};
pub use crate::core::store::{HitStore, JournalOptions, JournalStore, MemoryStore};
pub use crate::util::backoff::RetryPolicy;
