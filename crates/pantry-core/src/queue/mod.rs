//! Offline mutation queue
//!
//! Mutations are persisted before `enqueue` returns and replayed against the
//! remote by [`QueueManager::drain`].

mod backoff;
mod manager;
mod report;
mod store;

pub use backoff::Backoff;
pub use manager::{ConflictHandler, EnqueueOutcome, QueueManager, QueueStatus, Reconciliation};
pub use report::{DrainOutcome, DrainReport, DrainResult};
pub use store::{MemoryQueueStore, QueueStore, StatusChange};
