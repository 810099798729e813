//! Conflict detection and resolution
//!
//! [`ConflictDetector`] turns a local/remote pair of snapshots into a
//! [`ConflictRecord`](crate::models::ConflictRecord); [`ConflictResolver`]
//! decides whether it can be merged automatically or must wait for a person.

mod detector;
mod resolver;
mod schema;

pub use detector::{ConflictDetector, DEFAULT_MAX_DEPTH, DELETED_FIELD};
pub use resolver::{local_wins, ConflictResolver, Resolution, DEFAULT_LWW_THRESHOLD_MS};
pub use schema::{CompletionRule, RecordSchema};
