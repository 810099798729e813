//! Database layer for Pantry

mod conflict_repository;
mod connection;
mod metadata_repository;
mod migrations;
mod queue_store;

pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use connection::Database;
pub use metadata_repository::{SqliteSyncMetadataRepository, SyncMetadataRepository};
pub use queue_store::SqliteQueueStore;
