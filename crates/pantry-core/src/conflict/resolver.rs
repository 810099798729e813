//! Automatic resolution policy with manual escalation

use serde_json::Value;

use super::detector::DELETED_FIELD;
use super::schema::RecordSchema;
use crate::error::ResolutionError;
use crate::models::{ConflictRecord, FieldConflict, RecordSnapshot, ResolutionStrategy};

/// Default minimum distance between edits for per-field last-write-wins (5 minutes)
pub const DEFAULT_LWW_THRESHOLD_MS: i64 = 5 * 60 * 1000;

/// Outcome of [`ConflictResolver::resolve`]
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    AutoResolved {
        merged: RecordSnapshot,
        strategy: ResolutionStrategy,
    },
    /// The engine does not guess; the conflict goes to a human.
    RequiresManual(Box<ConflictRecord>),
}

impl Resolution {
    pub const fn is_manual(&self) -> bool {
        matches!(self, Self::RequiresManual(_))
    }
}

/// Deterministic winner between two writes of the same field.
///
/// The later timestamp wins; equal timestamps go to the greater client id,
/// and identical client ids keep the local value.
pub fn local_wins(local_at: i64, remote_at: i64, local_client: &str, remote_client: &str) -> bool {
    if local_at != remote_at {
        return local_at > remote_at;
    }
    local_client >= remote_client
}

type Attempt = Option<Result<RecordSnapshot, ResolutionError>>;

/// Applies the resolution rules in order; the first rule that applies decides.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    schema: RecordSchema,
    lww_threshold_ms: i64,
}

impl ConflictResolver {
    pub const fn new(schema: RecordSchema, lww_threshold_ms: i64) -> Self {
        Self {
            schema,
            lww_threshold_ms,
        }
    }

    /// Resolve a detected conflict. Pure: equal inputs give equal outputs.
    pub fn resolve(&self, conflict: &ConflictRecord) -> Resolution {
        let critical = conflict.requires_manual_resolution
            || conflict
                .field_conflicts
                .iter()
                .any(|fc| self.schema.is_critical(&fc.field));
        if critical {
            return Self::escalate(conflict);
        }

        let attempt = [
            (ResolutionStrategy::CompletionPreferred, self.prefer_completion(conflict)),
            (ResolutionStrategy::FieldLastWriteWins, self.last_write_wins(conflict)),
            (ResolutionStrategy::TextMerge, self.merge_text(conflict)),
        ]
        .into_iter()
        .find_map(|(strategy, attempt)| attempt.map(|result| (strategy, result)));

        let Some((strategy, result)) = attempt else {
            return Self::escalate(conflict);
        };

        match result.and_then(|merged| self.validate(conflict, &merged).map(|()| merged)) {
            Ok(merged) => Resolution::AutoResolved { merged, strategy },
            Err(error) => {
                tracing::warn!(
                    target_id = %conflict.target_id,
                    %strategy,
                    %error,
                    "Discarding invalid merge, escalating conflict"
                );
                Self::escalate(conflict)
            }
        }
    }

    fn escalate(conflict: &ConflictRecord) -> Resolution {
        Resolution::RequiresManual(Box::new(conflict.clone()))
    }

    /// Rule 1: a completed item stays completed.
    fn prefer_completion(&self, conflict: &ConflictRecord) -> Attempt {
        let rule = self.schema.completion.as_ref()?;
        let fc = conflict.field_conflict(&rule.field)?;
        let local_done = rule.is_completed(Some(&fc.local_value));
        let remote_done = rule.is_completed(Some(&fc.remote_value));
        if local_done == remote_done {
            return None;
        }

        let mut merged = Self::later_side(conflict);
        let completed_at = if local_done {
            fc.local_timestamp
        } else {
            fc.remote_timestamp
        };
        merged.set_field(rule.field.clone(), rule.completed_value.clone(), completed_at);
        Some(Ok(merged))
    }

    /// Rule 2: every conflicting field independently takes the newer value.
    fn last_write_wins(&self, conflict: &ConflictRecord) -> Attempt {
        if !conflict
            .field_conflicts
            .iter()
            .all(|fc| fc.timestamp_gap() > self.lww_threshold_ms)
        {
            return None;
        }

        let mut merged = Self::later_side(conflict);
        for fc in &conflict.field_conflicts {
            let (value, at) = if Self::field_local_wins(conflict, fc) {
                (fc.local_value.clone(), fc.local_timestamp)
            } else {
                (fc.remote_value.clone(), fc.remote_timestamp)
            };
            write_field(&mut merged, &fc.field, value, at);
        }
        Some(Ok(merged))
    }

    /// Rule 3: free-text fields keep the distinct segments of both sides.
    fn merge_text(&self, conflict: &ConflictRecord) -> Attempt {
        if !conflict
            .field_conflicts
            .iter()
            .all(|fc| self.schema.is_mergeable(&fc.field))
        {
            return None;
        }

        let mut merged = Self::later_side(conflict);
        for fc in &conflict.field_conflicts {
            let (older, newer) = if Self::field_local_wins(conflict, fc) {
                (&fc.remote_value, &fc.local_value)
            } else {
                (&fc.local_value, &fc.remote_value)
            };
            let text = match self.union_segments(older, newer) {
                Some(text) => text,
                None => return Some(Err(ResolutionError::NotMergeable(fc.field.clone()))),
            };
            let at = fc.local_timestamp.max(fc.remote_timestamp);
            merged.set_field(fc.field.clone(), Value::String(text), at);
        }
        Some(Ok(merged))
    }

    fn union_segments(&self, older: &Value, newer: &Value) -> Option<String> {
        let separator = self.schema.merge_separator.as_str();
        let mut segments: Vec<&str> = Vec::new();
        for value in [older, newer] {
            let text = match value {
                Value::Null => continue,
                Value::String(text) => text.as_str(),
                _ => return None,
            };
            let pieces = if separator.is_empty() {
                vec![text]
            } else {
                text.split(separator).collect()
            };
            for piece in pieces.into_iter().map(str::trim) {
                if !piece.is_empty() && !segments.contains(&piece) {
                    segments.push(piece);
                }
            }
        }
        Some(segments.join(separator))
    }

    fn field_local_wins(conflict: &ConflictRecord, fc: &FieldConflict) -> bool {
        local_wins(
            fc.local_timestamp,
            fc.remote_timestamp,
            &conflict.local_version.client_id,
            &conflict.remote_version.client_id,
        )
    }

    /// Whole-record base for a merge: the later side, carrying the newest
    /// server version seen on either side.
    fn later_side(conflict: &ConflictRecord) -> RecordSnapshot {
        let local = &conflict.local_version;
        let remote = &conflict.remote_version;
        let local_later = local_wins(
            local.updated_at,
            remote.updated_at,
            &local.client_id,
            &remote.client_id,
        );
        let mut base = if local_later {
            local.clone()
        } else {
            remote.clone()
        };
        base.version = local.version.max(remote.version);
        base.updated_at = local.updated_at.max(remote.updated_at);
        base
    }

    fn validate(
        &self,
        conflict: &ConflictRecord,
        merged: &RecordSnapshot,
    ) -> Result<(), ResolutionError> {
        if merged.target_id != conflict.target_id {
            return Err(ResolutionError::TargetMismatch {
                expected: conflict.target_id.clone(),
                merged: merged.target_id.clone(),
            });
        }

        let present = |value: Option<&Value>| match value {
            None | Some(Value::Null) => false,
            Some(Value::String(text)) => !text.is_empty(),
            Some(_) => true,
        };
        for field in &self.schema.critical_fields {
            let had_value = present(conflict.local_version.field(field))
                || present(conflict.remote_version.field(field));
            if had_value && !present(merged.field(field)) {
                return Err(ResolutionError::CriticalFieldEmptied(field.clone()));
            }
        }

        if let Some(field) = self.schema.completion_field() {
            let value = merged.field(field);
            if value != conflict.local_version.field(field)
                && value != conflict.remote_version.field(field)
            {
                return Err(ResolutionError::CompletionValueInvented(field.to_string()));
            }
        }

        Ok(())
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(RecordSchema::default(), DEFAULT_LWW_THRESHOLD_MS)
    }
}

fn write_field(record: &mut RecordSnapshot, field: &str, value: Value, at: i64) {
    if field == DELETED_FIELD {
        record.deleted = value.as_bool().unwrap_or(record.deleted);
    } else {
        record.set_field(field.to_string(), value, at);
    }
}
