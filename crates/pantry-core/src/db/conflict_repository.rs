//! Pending conflicts and the append-only resolution log

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::models::{ConflictId, ConflictRecord, FieldMap, ResolutionLogEntry, ResolutionStrategy};

/// Trait for conflict storage operations
pub trait ConflictRepository {
    /// Store a conflict awaiting a manual decision (replaces an existing row)
    fn insert_pending(&self, conflict: &ConflictRecord) -> Result<()>;

    fn get_pending(&self, id: &ConflictId) -> Result<Option<ConflictRecord>>;

    /// Pending conflicts, oldest first
    fn list_pending(&self) -> Result<Vec<ConflictRecord>>;

    /// Remove a pending conflict; returns whether it existed
    fn remove_pending(&self, id: &ConflictId) -> Result<bool>;

    /// Append an entry, assigning the next sequence number for its conflict
    fn append_log(&self, entry: &ResolutionLogEntry) -> Result<ResolutionLogEntry>;

    /// Most recent entries first
    fn list_log(&self, limit: usize) -> Result<Vec<ResolutionLogEntry>>;

    /// Entries for one conflict in sequence order
    fn log_for_conflict(&self, id: &ConflictId) -> Result<Vec<ResolutionLogEntry>>;
}

/// Redacted before/after values stored in the `summary` column
#[derive(Serialize, Deserialize)]
struct LogSummary {
    fields: Vec<String>,
    before_local: FieldMap,
    before_remote: FieldMap,
    after: FieldMap,
}

struct LogRow {
    conflict_id: String,
    sequence: i64,
    target_id: String,
    strategy: Option<String>,
    automatic: bool,
    resolved_by: Option<String>,
    summary: String,
    resolved_at: i64,
}

impl LogRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            conflict_id: row.get(0)?,
            sequence: row.get(1)?,
            target_id: row.get(2)?,
            strategy: row.get(3)?,
            automatic: row.get::<_, i32>(4)? != 0,
            resolved_by: row.get(5)?,
            summary: row.get(6)?,
            resolved_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<ResolutionLogEntry> {
        let conflict_id = self
            .conflict_id
            .parse()
            .map_err(|error| StorageError::Corruption(format!("invalid conflict id: {error}")))?;
        let strategy = self.strategy.as_deref().map(parse_strategy).transpose()?;
        let summary: LogSummary = serde_json::from_str(&self.summary)?;

        Ok(ResolutionLogEntry {
            conflict_id,
            sequence: self.sequence,
            target_id: self.target_id,
            strategy,
            automatic: self.automatic,
            resolved_by: self.resolved_by,
            fields: summary.fields,
            before_local: summary.before_local,
            before_remote: summary.before_remote,
            after: summary.after,
            resolved_at: self.resolved_at,
        })
    }
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn decode_conflict(body: &str) -> Result<ConflictRecord> {
        Ok(serde_json::from_str(body)?)
    }

    fn query_log(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ResolutionLogEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, LogRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(LogRow::decode).collect()
    }
}

fn parse_strategy(value: &str) -> Result<ResolutionStrategy> {
    match value {
        "completion_preferred" => Ok(ResolutionStrategy::CompletionPreferred),
        "field_lww" => Ok(ResolutionStrategy::FieldLastWriteWins),
        "text_merge" => Ok(ResolutionStrategy::TextMerge),
        other => Err(StorageError::Corruption(format!("unknown strategy: {other}")).into()),
    }
}

const LOG_COLUMNS: &str = "SELECT conflict_id, sequence, target_id, strategy, automatic,
        resolved_by, summary, resolved_at
     FROM resolution_log";

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn insert_pending(&self, conflict: &ConflictRecord) -> Result<()> {
        let body = serde_json::to_string(conflict)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO pending_conflicts (id, target_id, mutation_id, detected_at, body)
             VALUES (?, ?, ?, ?, ?)",
            params![
                conflict.id.as_str(),
                conflict.target_id,
                conflict.mutation_id.map(|id| id.as_str()),
                conflict.detected_at,
                body,
            ],
        )?;
        Ok(())
    }

    fn get_pending(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM pending_conflicts WHERE id = ?",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        body.as_deref().map(Self::decode_conflict).transpose()
    }

    fn list_pending(&self) -> Result<Vec<ConflictRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM pending_conflicts ORDER BY detected_at ASC, id ASC")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bodies.iter().map(|body| Self::decode_conflict(body)).collect()
    }

    fn remove_pending(&self, id: &ConflictId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM pending_conflicts WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn append_log(&self, entry: &ResolutionLogEntry) -> Result<ResolutionLogEntry> {
        let summary = serde_json::to_string(&LogSummary {
            fields: entry.fields.clone(),
            before_local: entry.before_local.clone(),
            before_remote: entry.before_remote.clone(),
            after: entry.after.clone(),
        })
        .map_err(StorageError::from)?;

        let tx = self.conn.unchecked_transaction()?;
        let sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM resolution_log WHERE conflict_id = ?",
            params![entry.conflict_id.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO resolution_log
                (conflict_id, sequence, target_id, strategy, automatic, resolved_by, summary, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.conflict_id.as_str(),
                sequence,
                entry.target_id,
                entry.strategy.map(ResolutionStrategy::as_str),
                i32::from(entry.automatic),
                entry.resolved_by,
                summary,
                entry.resolved_at,
            ],
        )?;
        tx.commit()?;

        Ok(ResolutionLogEntry {
            sequence,
            ..entry.clone()
        })
    }

    fn list_log(&self, limit: usize) -> Result<Vec<ResolutionLogEntry>> {
        self.query_log(
            &format!("{LOG_COLUMNS} ORDER BY resolved_at DESC, conflict_id DESC, sequence DESC LIMIT ?"),
            params![limit as i64],
        )
    }

    fn log_for_conflict(&self, id: &ConflictId) -> Result<Vec<ResolutionLogEntry>> {
        self.query_log(
            &format!("{LOG_COLUMNS} WHERE conflict_id = ? ORDER BY sequence ASC"),
            params![id.as_str()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ConflictOutcome, FieldConflict, RecordSnapshot};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn conflict(detected_at: i64) -> ConflictRecord {
        let local = RecordSnapshot::new("x", "a", 100).with_field("name", json!("Milk"), 100);
        let remote = RecordSnapshot::new("x", "b", 200).with_field("name", json!("Oat milk"), 200);
        ConflictRecord {
            id: ConflictId::new(),
            target_id: "x".to_string(),
            detected_at,
            field_conflicts: vec![FieldConflict {
                field: "name".to_string(),
                local_value: json!("Milk"),
                remote_value: json!("Oat milk"),
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

    #[test]
    fn test_pending_conflict_lifecycle() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());
        let first = conflict(10);
        let second = conflict(20);

        repo.insert_pending(&second).unwrap();
        repo.insert_pending(&first).unwrap();

        assert_eq!(repo.get_pending(&first.id).unwrap(), Some(first.clone()));
        let listed: Vec<_> = repo.list_pending().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(listed, vec![first.id, second.id]);

        assert!(repo.remove_pending(&first.id).unwrap());
        assert!(!repo.remove_pending(&first.id).unwrap());
        assert_eq!(repo.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn test_append_log_assigns_sequence_per_conflict() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());
        let conflict = conflict(10);

        let first = ResolutionLogEntry::manual(&conflict, &conflict.local_version, "sam", 30);
        let second = ResolutionLogEntry::manual(&conflict, &conflict.remote_version, "kim", 40);

        assert_eq!(repo.append_log(&first).unwrap().sequence, 1);
        assert_eq!(repo.append_log(&second).unwrap().sequence, 2);

        let entries = repo.log_for_conflict(&conflict.id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].resolved_by.as_deref(), Some("sam"));
        assert_eq!(entries[1].after.get("name"), Some(&json!("Oat milk")));
    }

    #[test]
    fn test_list_log_is_newest_first_and_limited() {
        let db = setup();
        let repo = SqliteConflictRepository::new(db.connection());

        for resolved_at in [10, 30, 20] {
            let conflict = conflict(resolved_at);
            let merged = conflict.remote_version.clone();
            let entry = ResolutionLogEntry::automatic(
                &conflict,
                &merged,
                ResolutionStrategy::FieldLastWriteWins,
                resolved_at,
            );
            repo.append_log(&entry).unwrap();
        }

        let entries = repo.list_log(2).unwrap();
        let times: Vec<_> = entries.iter().map(|entry| entry.resolved_at).collect();
        assert_eq!(times, vec![30, 20]);
        assert_eq!(
            entries[0].strategy,
            Some(ResolutionStrategy::FieldLastWriteWins)
        );
        assert!(entries[0].automatic);
    }
}
