//! Contracts of the external replication engine
//!
//! The engine never talks to the network or the local reactive cache
//! directly. Hosts implement [`RemoteSender`] for transport and
//! [`Replicator`] for the replicated record store.

use thiserror::Error;

use crate::models::{MutationRecord, RecordSnapshot};

/// Acknowledgement of an accepted mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    /// Server revision assigned to the record, when reported
    pub version: Option<i64>,
}

/// Why the remote did not accept a mutation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The remote holds a newer conflicting version.
    #[error("Remote holds a conflicting version of '{}'", .0.target_id)]
    Conflict(Box<RecordSnapshot>),

    /// Network failure or timeout; worth retrying.
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// Validation or permission failure; never retried.
    #[error("Rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    /// Credentials were refused; the whole sync cycle fails.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl RemoteError {
    /// Map an HTTP-style status code to the matching error class.
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match status {
            401 => Self::Unauthorized(reason),
            408 | 425 | 429 | 500..=599 => Self::Transient(reason),
            _ => Self::Rejected { status, reason },
        }
    }
}

/// Network transport for queued mutations
#[allow(async_fn_in_trait)]
pub trait RemoteSender {
    async fn send(&self, mutation: &MutationRecord) -> Result<Ack, RemoteError>;
}

/// Read/write access to the replicated record store
#[allow(async_fn_in_trait)]
pub trait Replicator {
    /// Authoritative remote view of a record.
    async fn fetch_remote(&self, target_id: &str) -> Result<RecordSnapshot, RemoteError>;

    /// Write a record into the local reactive cache.
    async fn apply_local(&self, record: &RecordSnapshot) -> Result<(), RemoteError>;

    /// Current local view of a record, if any.
    async fn local_snapshot(&self, target_id: &str) -> Option<RecordSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            RemoteError::from_status(401, "expired"),
            RemoteError::Unauthorized(_)
        ));
        assert!(matches!(
            RemoteError::from_status(503, "unavailable"),
            RemoteError::Transient(_)
        ));
        assert!(matches!(
            RemoteError::from_status(429, "slow down"),
            RemoteError::Transient(_)
        ));
        assert_eq!(
            RemoteError::from_status(422, "quantity must be positive"),
            RemoteError::Rejected {
                status: 422,
                reason: "quantity must be positive".to_string(),
            }
        );
    }
}
