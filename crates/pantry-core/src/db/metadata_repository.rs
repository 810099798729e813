//! Sync metadata repository

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::SyncMetadata;

/// Trait for sync metadata storage
pub trait SyncMetadataRepository {
    /// Load the stored metadata, or the empty default before the first sync
    fn load(&self) -> Result<SyncMetadata>;

    fn save(&self, metadata: &SyncMetadata) -> Result<()>;
}

/// `SQLite` implementation of `SyncMetadataRepository`
pub struct SqliteSyncMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncMetadataRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncMetadataRepository for SqliteSyncMetadataRepository<'_> {
    fn load(&self) -> Result<SyncMetadata> {
        let metadata = self
            .conn
            .query_row(
                "SELECT last_sync_timestamp, last_sync_version FROM sync_metadata WHERE id = 1",
                [],
                |row| {
                    Ok(SyncMetadata {
                        last_sync_timestamp: row.get(0)?,
                        last_sync_version: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(metadata.unwrap_or_default())
    }

    fn save(&self, metadata: &SyncMetadata) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_metadata (id, last_sync_timestamp, last_sync_version)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                last_sync_timestamp = excluded.last_sync_timestamp,
                last_sync_version = excluded.last_sync_version",
            params![metadata.last_sync_timestamp, metadata.last_sync_version],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_load_defaults_before_first_save() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncMetadataRepository::new(db.connection());
        assert_eq!(repo.load().unwrap(), SyncMetadata::default());
    }

    #[test]
    fn test_save_overwrites_singleton_row() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncMetadataRepository::new(db.connection());

        repo.save(&SyncMetadata::default().advanced(100, Some(4)))
            .unwrap();
        repo.save(&SyncMetadata::default().advanced(200, Some(9)))
            .unwrap();

        let loaded = repo.load().unwrap();
        assert_eq!(loaded.last_sync_timestamp, Some(200));
        assert_eq!(loaded.last_sync_version, Some(9));

        let rows: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM sync_metadata", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
