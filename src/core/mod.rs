pub mod entry;
pub mod error;
pub mod observer;
pub mod queue;
pub mod sender;
pub mod store;

pub(crate) mod dispatcher;
