//! Data models for Pantry

mod conflict;
mod mutation;
mod record;
mod sync_metadata;

pub use conflict::{
    ConflictId, ConflictOutcome, ConflictRecord, FieldConflict, ResolutionLogEntry,
    ResolutionStrategy,
};
pub use mutation::{
    FieldMap, MutationId, MutationKind, MutationRecord, MutationStatus, NewMutation,
    MANUAL_CONFLICT_ERROR,
};
pub use record::RecordSnapshot;
pub use sync_metadata::SyncMetadata;
