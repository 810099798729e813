//! pantry-core - Core library for Pantry
//!
//! This crate contains the offline mutation queue, the conflict detector and
//! resolver, and the sync coordinator that sequences them against the
//! external replication engine. Hosts (desktop, mobile, CLI) construct one
//! [`sync::SyncCoordinator`] per open list database and drive it with
//! triggers.

pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod remote;
pub mod services;
pub mod sync;
mod util;

pub use error::{
    DetectorError, DrainError, Error, QueueError, ResolutionError, Result, StorageError, SyncError,
};
pub use models::{
    ConflictId, ConflictRecord, MutationId, MutationKind, MutationRecord, MutationStatus,
    NewMutation, RecordSnapshot,
};
