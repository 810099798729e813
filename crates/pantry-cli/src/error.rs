use std::io;

use pantry_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] pantry_core::Error),
    #[error(transparent)]
    Storage(#[from] pantry_core::StorageError),
    #[error(transparent)]
    Queue(#[from] pantry_core::QueueError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid field assignment '{0}', expected FIELD=VALUE")]
    InvalidAssignment(String),
    #[error("Mutation ID cannot be empty")]
    EmptyMutationId,
    #[error("Mutation not found for id/prefix: {0}")]
    MutationNotFound(String),
    #[error("{0}")]
    AmbiguousMutationId(String),
    #[error("Invalid conflict ID: {0}")]
    InvalidConflictId(String),
}
