use thiserror::Error;

use crate::core::entry::HitId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal corruption: {0}")]
    Corruption(String),

    #[error("duplicate hit id {0}")]
    Duplicate(HitId),

    #[error("store is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("duplicate hit id {0}")]
    Duplicate(HitId),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(id) => QueueError::Duplicate(id),
            StoreError::Closed => QueueError::Closed,
            other => QueueError::Store(other),
        }
    }
}
