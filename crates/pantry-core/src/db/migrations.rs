//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|value| value != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: queue, metadata, conflicts and resolution log
fn migrate_v1(conn: &Connection) -> Result<()> {
    // Dropping the transaction without commit rolls every statement back
    let tx = conn.unchecked_transaction()?;

    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Offline mutation queue
        "CREATE TABLE IF NOT EXISTS mutations (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            target_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            priority INTEGER NOT NULL,
            status TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            next_attempt_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_mutations_target ON mutations(target_id)",
        "CREATE INDEX IF NOT EXISTS idx_mutations_drain ON mutations(status, priority DESC, created_at ASC)",
        // Singleton sync bookkeeping row
        "CREATE TABLE IF NOT EXISTS sync_metadata (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_sync_timestamp INTEGER,
            last_sync_version INTEGER
        )",
        // Conflicts waiting for a manual decision
        "CREATE TABLE IF NOT EXISTS pending_conflicts (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            mutation_id TEXT,
            detected_at INTEGER NOT NULL,
            body TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_pending_conflicts_target ON pending_conflicts(target_id)",
        // Append-only audit trail of conflict outcomes
        "CREATE TABLE IF NOT EXISTS resolution_log (
            conflict_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            target_id TEXT NOT NULL,
            strategy TEXT,
            automatic INTEGER NOT NULL,
            resolved_by TEXT,
            summary TEXT NOT NULL,
            resolved_at INTEGER NOT NULL,
            PRIMARY KEY (conflict_id, sequence)
        )",
        "CREATE INDEX IF NOT EXISTS idx_resolution_log_resolved_at ON resolution_log(resolved_at DESC)",
        "CREATE TRIGGER IF NOT EXISTS resolution_log_no_update BEFORE UPDATE ON resolution_log
         BEGIN
             SELECT RAISE(ABORT, 'resolution_log is append-only');
         END",
        "CREATE TRIGGER IF NOT EXISTS resolution_log_no_delete BEFORE DELETE ON resolution_log
         BEGIN
             SELECT RAISE(ABORT, 'resolution_log is append-only');
         END",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        tx.execute(stmt, [])?;
    }

    tx.commit()?;

    tracing::info!("Migrated queue database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_resolution_log_rejects_update_and_delete() {
        let conn = setup();
        run(&conn).unwrap();

        conn.execute(
            "INSERT INTO resolution_log
                (conflict_id, sequence, target_id, strategy, automatic, resolved_by, summary, resolved_at)
             VALUES ('c', 1, 'x', 'field_lww', 1, NULL, '{}', 10)",
            [],
        )
        .unwrap();

        assert!(conn
            .execute("UPDATE resolution_log SET target_id = 'y'", [])
            .is_err());
        assert!(conn.execute("DELETE FROM resolution_log", []).is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM resolution_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
