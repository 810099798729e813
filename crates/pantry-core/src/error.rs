//! Error types for pantry-core

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::models::MutationId;

/// Result type alias using pantry-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the persistence layer outside the queue store contract
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Self::Storage(error.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Storage(error.into())
    }
}

/// Failures of the durable mutation store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The underlying medium rejected a write for lack of space.
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// The local database is unreadable; the host must reset the local cache.
    #[error("Storage corrupted: {0}")]
    Corruption(String),

    /// Any other backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored row could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No mutation with this id exists in the store.
    #[error("Mutation not found: {0}")]
    NotFound(MutationId),
}

impl StorageError {
    /// Corruption cannot be recovered from without a local reset.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(error: rusqlite::Error) -> Self {
        match error.sqlite_error_code() {
            Some(ErrorCode::DiskFull) => Self::QuotaExceeded,
            Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => {
                Self::Corruption(error.to_string())
            }
            _ => Self::Backend(error.to_string()),
        }
    }
}

/// Errors returned by `QueueManager::enqueue` and friends.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The mutation is rejected before it is stored.
    #[error("Malformed mutation: {0}")]
    Malformed(String),

    /// Only permanently failed mutations may be discarded.
    #[error("Mutation {0} is not permanently failed")]
    NotExhausted(MutationId),

    /// The store refused the write.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Precondition failures of the conflict detector. Always a programming error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("Cannot compare record '{local}' with record '{remote}'")]
    IdMismatch { local: String, remote: String },
}

/// A resolution strategy produced a merged record that fails validation.
///
/// Never escapes the resolver: the conflict is escalated instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Merged record targets '{merged}' instead of '{expected}'")]
    TargetMismatch { expected: String, merged: String },

    #[error("Merge emptied critical field '{0}'")]
    CriticalFieldEmptied(String),

    #[error("Merge invented completion value for '{0}'")]
    CompletionValueInvented(String),

    #[error("Field '{0}' holds a value that cannot be text-merged")]
    NotMergeable(String),
}

/// Fatal errors that abort a drain cycle.
#[derive(Error, Debug)]
pub enum DrainError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    /// The remote refused our credentials; the record was returned to the queue.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Persisting a conflict or log entry failed.
    #[error("Conflict bookkeeping failed: {0}")]
    Ledger(String),

    /// Writing a merged record into the local cache failed.
    #[error("Applying merged record locally failed: {0}")]
    LocalApply(String),
}

impl DrainError {
    /// Storage corruption requires the host to reset the local cache.
    pub const fn requires_reset(&self) -> bool {
        matches!(self, Self::Storage(error) if error.is_fatal())
    }
}

/// Structured reason attached to a `Failed` sync cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Drain aborted: {0}")]
    Drain(#[from] DrainError),

    #[error("Fetching remote state for '{target_id}' failed: {reason}")]
    Fetch { target_id: String, reason: String },

    #[error("Applying '{target_id}' to the local cache failed: {reason}")]
    Apply { target_id: String, reason: String },

    /// Mutations that ran out of retries this cycle; they stay queued for `discard`.
    #[error("{} mutation(s) permanently failed after exhausting retries", mutation_ids.len())]
    RetriesExhausted { mutation_ids: Vec<MutationId> },

    #[error(transparent)]
    Persistence(#[from] Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn disk_full_maps_to_quota_exceeded() {
        let error = StorageError::from(sqlite_failure(rusqlite::ffi::SQLITE_FULL));
        assert!(matches!(error, StorageError::QuotaExceeded));
        assert!(!error.is_fatal());
    }

    #[test]
    fn corrupt_database_is_fatal() {
        let corrupt = StorageError::from(sqlite_failure(rusqlite::ffi::SQLITE_CORRUPT));
        assert!(corrupt.is_fatal());

        let not_a_db = StorageError::from(sqlite_failure(rusqlite::ffi::SQLITE_NOTADB));
        assert!(matches!(not_a_db, StorageError::Corruption(_)));
    }

    #[test]
    fn drain_error_flags_corruption_for_reset() {
        let corrupt = DrainError::from(StorageError::Corruption("bad page".to_string()));
        assert!(corrupt.requires_reset());
        assert!(!DrainError::Unauthorized("expired".to_string()).requires_reset());
    }

    #[test]
    fn other_failures_are_backend_errors() {
        let error = StorageError::from(sqlite_failure(rusqlite::ffi::SQLITE_BUSY));
        assert!(matches!(error, StorageError::Backend(_)));
    }
}
