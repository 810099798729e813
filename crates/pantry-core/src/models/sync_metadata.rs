//! Sync metadata model

use serde::{Deserialize, Serialize};

/// Bookkeeping from the last successful sync cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Completion time of the last successful cycle (Unix ms)
    pub last_sync_timestamp: Option<i64>,
    /// Highest remote record version observed
    pub last_sync_version: Option<i64>,
}

impl SyncMetadata {
    /// Fold a finished cycle into the metadata.
    #[must_use]
    pub fn advanced(self, finished_at: i64, observed_version: Option<i64>) -> Self {
        let last_sync_version = match (self.last_sync_version, observed_version) {
            (Some(previous), Some(observed)) => Some(previous.max(observed)),
            (previous, observed) => previous.or(observed),
        };
        Self {
            last_sync_timestamp: Some(finished_at),
            last_sync_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advanced_keeps_highest_version() {
        let metadata = SyncMetadata::default().advanced(100, Some(7));
        assert_eq!(metadata.last_sync_timestamp, Some(100));
        assert_eq!(metadata.last_sync_version, Some(7));

        let metadata = metadata.advanced(200, Some(3));
        assert_eq!(metadata.last_sync_timestamp, Some(200));
        assert_eq!(metadata.last_sync_version, Some(7));

        let metadata = metadata.advanced(300, None);
        assert_eq!(metadata.last_sync_version, Some(7));
    }
}
