//! `SQLite` implementation of the queue store

use rusqlite::{params, OptionalExtension};
use std::path::Path;

use crate::db::Database;
use crate::error::StorageError;
use crate::models::{FieldMap, MutationId, MutationRecord};
use crate::queue::{QueueStore, StatusChange};

const SELECT_COLUMNS: &str = "SELECT id, kind, target_id, payload, created_at, priority, status,
        retry_count, last_error, next_attempt_at
     FROM mutations";

const INSERT_ROW: &str = "INSERT INTO mutations (id, kind, target_id, payload, created_at, priority, status,
        retry_count, last_error, next_attempt_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// Raw column values, decoded outside the row callback so decode failures
/// surface as [`StorageError`] rather than `rusqlite` conversion errors.
struct MutationRow {
    id: String,
    kind: String,
    target_id: String,
    payload: String,
    created_at: i64,
    priority: i32,
    status: String,
    retry_count: u32,
    last_error: Option<String>,
    next_attempt_at: Option<i64>,
}

impl MutationRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            target_id: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
            priority: row.get(5)?,
            status: row.get(6)?,
            retry_count: row.get(7)?,
            last_error: row.get(8)?,
            next_attempt_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<MutationRecord, StorageError> {
        let id = self
            .id
            .parse::<MutationId>()
            .map_err(|error| StorageError::Corruption(format!("invalid mutation id: {error}")))?;
        let kind = self.kind.parse().map_err(StorageError::Corruption)?;
        let status = self.status.parse().map_err(StorageError::Corruption)?;
        let payload: FieldMap = serde_json::from_str(&self.payload)?;

        Ok(MutationRecord {
            id,
            kind,
            target_id: self.target_id,
            payload,
            created_at: self.created_at,
            priority: self.priority,
            status,
            retry_count: self.retry_count,
            last_error: self.last_error,
            next_attempt_at: self.next_attempt_at,
        })
    }
}

/// Durable queue store backed by the `mutations` table
pub struct SqliteQueueStore {
    db: Database,
}

impl SqliteQueueStore {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open (and migrate) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> crate::Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn write_row(&self, sql: &str, record: &MutationRecord) -> Result<usize, StorageError> {
        let payload = serde_json::to_string(&record.payload)?;
        let rows = self.db.connection().execute(
            sql,
            params![
                record.id.as_str(),
                record.kind.as_str(),
                record.target_id,
                payload,
                record.created_at,
                record.priority,
                record.status.as_str(),
                record.retry_count,
                record.last_error,
                record.next_attempt_at,
            ],
        )?;
        Ok(rows)
    }
}

impl QueueStore for SqliteQueueStore {
    fn append(&mut self, record: &MutationRecord) -> Result<(), StorageError> {
        self.write_row(INSERT_ROW, record)?;
        Ok(())
    }

    fn get(&self, id: &MutationId) -> Result<Option<MutationRecord>, StorageError> {
        let row = self
            .db
            .connection()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?"),
                params![id.as_str()],
                MutationRow::read,
            )
            .optional()?;
        row.map(MutationRow::decode).transpose()
    }

    fn load_all(&self) -> Result<Vec<MutationRecord>, StorageError> {
        let mut stmt = self
            .db
            .connection()
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at ASC, id ASC"))?;

        let rows = stmt
            .query_map([], MutationRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(MutationRow::decode).collect()
    }

    fn update(&mut self, id: &MutationId, change: &StatusChange) -> Result<(), StorageError> {
        let rows = self.db.connection().execute(
            "UPDATE mutations
             SET status = ?, retry_count = ?, last_error = ?, next_attempt_at = ?
             WHERE id = ?",
            params![
                change.status.as_str(),
                change.retry_count,
                change.last_error,
                change.next_attempt_at,
                id.as_str(),
            ],
        )?;

        if rows == 0 {
            return Err(StorageError::NotFound(*id));
        }
        Ok(())
    }

    fn replace(&mut self, record: &MutationRecord) -> Result<(), StorageError> {
        let rows = self.write_row(
            "UPDATE mutations
             SET id = ?1, kind = ?2, target_id = ?3, payload = ?4, created_at = ?5,
                 priority = ?6, status = ?7, retry_count = ?8, last_error = ?9,
                 next_attempt_at = ?10
             WHERE id = ?1",
            record,
        )?;

        if rows == 0 {
            return Err(StorageError::NotFound(record.id));
        }
        Ok(())
    }

    fn remove(&mut self, id: &MutationId) -> Result<(), StorageError> {
        let rows = self
            .db
            .connection()
            .execute("DELETE FROM mutations WHERE id = ?", params![id.as_str()])?;

        if rows == 0 {
            return Err(StorageError::NotFound(*id));
        }
        Ok(())
    }

    fn remove_many(&mut self, ids: &[MutationId]) -> Result<usize, StorageError> {
        let tx = self.db.connection().unchecked_transaction()?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM mutations WHERE id = ?", params![id.as_str()])?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn append_and_remove(
        &mut self,
        record: &MutationRecord,
        ids: &[MutationId],
    ) -> Result<usize, StorageError> {
        let tx = self.db.connection().unchecked_transaction()?;
        self.write_row(INSERT_ROW, record)?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM mutations WHERE id = ?", params![id.as_str()])?;
        }
        tx.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MutationStatus, NewMutation};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn update_record(target: &str, quantity: i64, created_at: i64) -> MutationRecord {
        let mut payload = FieldMap::new();
        payload.insert("quantity".to_string(), json!(quantity));
        MutationRecord::from_new(NewMutation::update(target, payload), created_at)
    }

    #[test]
    fn test_append_and_get() {
        let mut store = SqliteQueueStore::open_in_memory().unwrap();
        let record = update_record("x", 2, 100);

        store.append(&record).unwrap();

        let fetched = store.get(&record.id).unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[test]
    fn test_update_replaces_status_tuple() {
        let mut store = SqliteQueueStore::open_in_memory().unwrap();
        let record = update_record("x", 2, 100);
        store.append(&record).unwrap();

        let change = StatusChange {
            status: MutationStatus::Failed,
            retry_count: 3,
            last_error: Some("timeout".to_string()),
            next_attempt_at: Some(5_000),
        };
        store.update(&record.id, &change).unwrap();

        let fetched = store.get(&record.id).unwrap().unwrap();
        assert_eq!(fetched.status, MutationStatus::Failed);
        assert_eq!(fetched.retry_count, 3);
        assert_eq!(fetched.last_error.as_deref(), Some("timeout"));
        assert_eq!(fetched.next_attempt_at, Some(5_000));
        assert_eq!(fetched.payload, record.payload);
    }

    #[test]
    fn test_replace_and_remove() {
        let mut store = SqliteQueueStore::open_in_memory().unwrap();
        let mut record = update_record("x", 2, 100);
        store.append(&record).unwrap();

        record.payload.insert("quantity".to_string(), json!(5));
        store.replace(&record).unwrap();
        assert_eq!(
            store.get(&record.id).unwrap().unwrap().payload.get("quantity"),
            Some(&json!(5))
        );

        store.remove(&record.id).unwrap();
        assert!(store.get(&record.id).unwrap().is_none());
        assert!(matches!(
            store.remove(&record.id).unwrap_err(),
            StorageError::NotFound(_)
        ));
    }

    #[test]
    fn test_remove_many_counts_existing_rows() {
        let mut store = SqliteQueueStore::open_in_memory().unwrap();
        let first = update_record("a", 1, 1);
        let second = update_record("b", 1, 2);
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let removed = store
            .remove_many(&[first.id, second.id, MutationId::new()])
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_append_and_remove_rolls_back_on_failure() {
        let mut store = SqliteQueueStore::open_in_memory().unwrap();
        let edit = update_record("x", 2, 100);
        store.append(&edit).unwrap();

        let delete = MutationRecord::from_new(NewMutation::delete("x"), 200);
        assert_eq!(store.append_and_remove(&delete, &[edit.id]).unwrap(), 1);
        assert_eq!(store.load_all().unwrap(), vec![delete.clone()]);

        // Inserting a duplicate id fails, so nothing is removed either
        let other = update_record("y", 1, 50);
        store.append(&other).unwrap();
        assert!(store.append_and_remove(&delete, &[other.id]).is_err());
        assert_eq!(store.load_all().unwrap(), vec![other, delete]);
    }

    #[test]
    fn test_records_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("queue.db");
        let first = update_record("a", 1, 10);
        let second = update_record("b", 2, 20);

        {
            let mut store = SqliteQueueStore::open(&path).unwrap();
            store.append(&second).unwrap();
            store.append(&first).unwrap();
        }

        let store = SqliteQueueStore::open(&path).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![first, second]);
    }

    #[test]
    fn test_corrupted_payload_is_reported() {
        let store = SqliteQueueStore::open_in_memory().unwrap();
        store
            .db
            .connection()
            .execute(
                "INSERT INTO mutations (id, kind, target_id, payload, created_at, priority, status)
                 VALUES (?, 'update', 'x', 'not json', 1, 20, 'pending')",
                params![MutationId::new().as_str()],
            )
            .unwrap();

        assert!(matches!(
            store.load_all().unwrap_err(),
            StorageError::Serialization(_)
        ));
    }
}
