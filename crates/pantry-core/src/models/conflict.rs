//! Conflict models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::mutation::{FieldMap, MutationId};
use super::record::RecordSnapshot;

/// A unique identifier for a detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new unique conflict ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One field whose local and remote values diverge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub local_value: serde_json::Value,
    pub remote_value: serde_json::Value,
    pub local_timestamp: i64,
    pub remote_timestamp: i64,
}

impl FieldConflict {
    /// Absolute distance between the two edits, in milliseconds
    pub const fn timestamp_gap(&self) -> i64 {
        (self.local_timestamp - self.remote_timestamp).abs()
    }
}

/// Automatic resolution strategies, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// A completed item stays completed
    CompletionPreferred,
    /// Each field independently takes the newer value
    FieldLastWriteWins,
    /// Free-text values are unioned instead of overwritten
    TextMerge,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CompletionPreferred => "completion_preferred",
            Self::FieldLastWriteWins => "field_lww",
            Self::TextMerge => "text_merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome attached to a conflict record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictOutcome {
    Pending,
    AutoResolved {
        merged: RecordSnapshot,
        strategy: ResolutionStrategy,
    },
    ManuallyResolved {
        merged: RecordSnapshot,
        resolved_by: String,
    },
}

/// A detected divergence between the local and remote versions of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub target_id: String,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
    pub local_version: RecordSnapshot,
    pub remote_version: RecordSnapshot,
    /// Diverging fields, in tracked-field order
    pub field_conflicts: Vec<FieldConflict>,
    /// True when any conflicting field is critical
    pub requires_manual_resolution: bool,
    pub resolution: ConflictOutcome,
    /// Queued mutation whose replay surfaced this conflict
    #[serde(default)]
    pub mutation_id: Option<MutationId>,
}

impl ConflictRecord {
    /// Names of the conflicting fields
    pub fn fields(&self) -> Vec<String> {
        self.field_conflicts
            .iter()
            .map(|conflict| conflict.field.clone())
            .collect()
    }

    pub fn field_conflict(&self, field: &str) -> Option<&FieldConflict> {
        self.field_conflicts
            .iter()
            .find(|conflict| conflict.field == field)
    }

    /// Mark the conflict merged by `strategy` and summarize it for the log.
    pub fn resolve_automatically(
        &mut self,
        merged: RecordSnapshot,
        strategy: ResolutionStrategy,
        resolved_at: i64,
    ) -> ResolutionLogEntry {
        let entry = ResolutionLogEntry::automatic(self, &merged, strategy, resolved_at);
        self.resolution = ConflictOutcome::AutoResolved { merged, strategy };
        entry
    }

    /// Mark the conflict settled with `chosen` and summarize it for the log.
    pub fn resolve_manually(
        &mut self,
        chosen: RecordSnapshot,
        resolved_by: &str,
        resolved_at: i64,
    ) -> ResolutionLogEntry {
        let entry = ResolutionLogEntry::manual(self, &chosen, resolved_by, resolved_at);
        self.resolution = ConflictOutcome::ManuallyResolved {
            merged: chosen,
            resolved_by: resolved_by.to_string(),
        };
        entry
    }

    /// The settled record, once resolved.
    pub fn merged(&self) -> Option<&RecordSnapshot> {
        match &self.resolution {
            ConflictOutcome::Pending => None,
            ConflictOutcome::AutoResolved { merged, .. }
            | ConflictOutcome::ManuallyResolved { merged, .. } => Some(merged),
        }
    }
}

/// Immutable audit entry for a conflict outcome.
///
/// Only the conflicting fields are kept, the rest of each snapshot is redacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionLogEntry {
    pub conflict_id: ConflictId,
    /// Assigned by the log on append
    pub sequence: i64,
    pub target_id: String,
    /// Strategy for automatic outcomes, `None` for manual ones
    pub strategy: Option<ResolutionStrategy>,
    pub automatic: bool,
    pub resolved_by: Option<String>,
    pub fields: Vec<String>,
    pub before_local: FieldMap,
    pub before_remote: FieldMap,
    pub after: FieldMap,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
}

impl ResolutionLogEntry {
    /// Summarize an automatic resolution.
    pub fn automatic(
        conflict: &ConflictRecord,
        merged: &RecordSnapshot,
        strategy: ResolutionStrategy,
        resolved_at: i64,
    ) -> Self {
        Self::summarize(conflict, merged, Some(strategy), None, resolved_at)
    }

    /// Summarize a resolution supplied from outside the engine.
    pub fn manual(
        conflict: &ConflictRecord,
        chosen: &RecordSnapshot,
        resolved_by: &str,
        resolved_at: i64,
    ) -> Self {
        Self::summarize(
            conflict,
            chosen,
            None,
            Some(resolved_by.to_string()),
            resolved_at,
        )
    }

    fn summarize(
        conflict: &ConflictRecord,
        after: &RecordSnapshot,
        strategy: Option<ResolutionStrategy>,
        resolved_by: Option<String>,
        resolved_at: i64,
    ) -> Self {
        let fields = conflict.fields();
        let pick = |snapshot: &RecordSnapshot| -> FieldMap {
            fields
                .iter()
                .map(|field| {
                    let value = snapshot
                        .field(field)
                        .cloned()
                        .unwrap_or(serde_json::Value::Null);
                    (field.clone(), value)
                })
                .collect()
        };

        Self {
            conflict_id: conflict.id,
            sequence: 0,
            target_id: conflict.target_id.clone(),
            strategy,
            automatic: strategy.is_some(),
            resolved_by,
            before_local: pick(&conflict.local_version),
            before_remote: pick(&conflict.remote_version),
            after: pick(after),
            fields,
            resolved_at,
        }
    }
}
