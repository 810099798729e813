//! Shared bookkeeping service used by the sync coordinator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    ConflictRepository, Database, SqliteConflictRepository, SqliteSyncMetadataRepository,
    SyncMetadataRepository,
};
use crate::models::{ConflictId, ConflictRecord, ResolutionLogEntry, SyncMetadata};
use crate::Result;

/// Thread-safe access to pending conflicts, the resolution log and sync metadata.
#[derive(Clone)]
pub struct SyncLedger {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl SyncLedger {
    /// Open the ledger stored in the database file at `db_path`.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory ledger (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Arc::new(Mutex::new(Database::open_in_memory()?)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Persist a conflict that needs a manual decision.
    pub async fn save_pending_conflict(&self, conflict: &ConflictRecord) -> Result<()> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).insert_pending(conflict)
    }

    pub async fn pending_conflict(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).get_pending(id)
    }

    /// Conflicts awaiting a decision, oldest first.
    pub async fn pending_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list_pending()
    }

    /// Record a manual decision: append the log entry and drop the pending
    /// conflict in one transaction.
    pub async fn settle_conflict(&self, entry: &ResolutionLogEntry) -> Result<ResolutionLogEntry> {
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let repo = SqliteConflictRepository::new(&tx);
        let stored = repo.append_log(entry)?;
        repo.remove_pending(&entry.conflict_id)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Append an automatic outcome to the resolution log.
    pub async fn append_resolution(&self, entry: &ResolutionLogEntry) -> Result<ResolutionLogEntry> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).append_log(entry)
    }

    /// Most recent resolution log entries first.
    pub async fn resolution_log(&self, limit: usize) -> Result<Vec<ResolutionLogEntry>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list_log(limit)
    }

    pub async fn resolution_history(&self, id: &ConflictId) -> Result<Vec<ResolutionLogEntry>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).log_for_conflict(id)
    }

    pub async fn sync_metadata(&self) -> Result<SyncMetadata> {
        let db = self.db.lock().await;
        SqliteSyncMetadataRepository::new(db.connection()).load()
    }

    /// Fold a finished cycle into the stored metadata and return the new value.
    pub async fn advance_sync_metadata(
        &self,
        finished_at: i64,
        observed_version: Option<i64>,
    ) -> Result<SyncMetadata> {
        let db = self.db.lock().await;
        let repo = SqliteSyncMetadataRepository::new(db.connection());
        let metadata = repo.load()?.advanced(finished_at, observed_version);
        repo.save(&metadata)?;
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictOutcome, FieldConflict, RecordSnapshot};
    use serde_json::json;
    use tempfile::tempdir;

    fn conflict() -> ConflictRecord {
        let local = RecordSnapshot::new("x", "a", 100).with_field("name", json!("Eggs"), 100);
        let remote = RecordSnapshot::new("x", "b", 200).with_field("name", json!("Eggs (12)"), 200);
        ConflictRecord {
            id: ConflictId::new(),
            target_id: "x".to_string(),
            detected_at: 300,
            field_conflicts: vec![FieldConflict {
                field: "name".to_string(),
                local_value: json!("Eggs"),
                remote_value: json!("Eggs (12)"),
                local_timestamp: 100,
                remote_timestamp: 200,
            }],
            local_version: local,
            remote_version: remote,
            requires_manual_resolution: true,
            resolution: ConflictOutcome::Pending,
            mutation_id: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_settle_conflict_moves_it_to_the_log() {
        let ledger = SyncLedger::open_in_memory().unwrap();
        let conflict = conflict();
        ledger.save_pending_conflict(&conflict).await.unwrap();

        let entry = ResolutionLogEntry::manual(&conflict, &conflict.remote_version, "ana", 400);
        let stored = ledger.settle_conflict(&entry).await.unwrap();

        assert_eq!(stored.sequence, 1);
        assert!(ledger.pending_conflicts().await.unwrap().is_empty());
        assert_eq!(ledger.resolution_log(10).await.unwrap().len(), 1);
        assert_eq!(
            ledger.resolution_history(&conflict.id).await.unwrap()[0]
                .resolved_by
                .as_deref(),
            Some("ana")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_metadata_persists_across_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("pantry.db");

        {
            let ledger = SyncLedger::open_path(&path).unwrap();
            ledger.advance_sync_metadata(1_000, Some(5)).await.unwrap();
            ledger.advance_sync_metadata(2_000, Some(3)).await.unwrap();
        }

        let ledger = SyncLedger::open_path(&path).unwrap();
        let metadata = ledger.sync_metadata().await.unwrap();
        assert_eq!(metadata.last_sync_timestamp, Some(2_000));
        assert_eq!(metadata.last_sync_version, Some(5));
        assert_eq!(ledger.db_path(), Some(path.as_path()));
    }
}
