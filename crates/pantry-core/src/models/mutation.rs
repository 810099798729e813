//! Mutation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Field name to value map used for mutation payloads and record fields.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// `last_error` marker for a mutation parked until a manual conflict decision.
pub const MANUAL_CONFLICT_ERROR: &str = "conflict:manual";

/// A unique identifier for a queued mutation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Create a new unique mutation ID using UUID v7
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

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What a mutation does to its target record; decides replay semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Insert a new record with the payload fields
    Create,
    /// Overwrite the payload fields of an existing record
    Update,
    /// Remove the record
    Delete,
    /// Toggle a single boolean flag (e.g. `gotten`)
    SetFlag,
}

impl MutationKind {
    /// Drain priority; higher drains first.
    ///
    /// Destructive and user-visible changes go out before plain edits.
    pub const fn priority(self) -> i32 {
        match self {
            Self::Delete => 40,
            Self::SetFlag => 30,
            Self::Update => 20,
            Self::Create => 10,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::SetFlag => "set_flag",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "set_flag" | "setflag" | "flag" => Ok(Self::SetFlag),
            other => Err(format!("unknown mutation kind: {other}")),
        }
    }
}

/// Queue lifecycle of a mutation. Only the queue manager changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    InFlight,
    Failed,
    Resolved,
}

impl MutationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Failed => "failed",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "failed" => Ok(Self::Failed),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("unknown mutation status: {other}")),
        }
    }
}

/// A mutation as submitted by the application, before it is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMutation {
    pub kind: MutationKind,
    pub target_id: String,
    #[serde(default)]
    pub payload: FieldMap,
}

impl NewMutation {
    pub fn new(kind: MutationKind, target_id: impl Into<String>, payload: FieldMap) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
            payload,
        }
    }

    pub fn create(target_id: impl Into<String>, payload: FieldMap) -> Self {
        Self::new(MutationKind::Create, target_id, payload)
    }

    pub fn update(target_id: impl Into<String>, payload: FieldMap) -> Self {
        Self::new(MutationKind::Update, target_id, payload)
    }

    pub fn delete(target_id: impl Into<String>) -> Self {
        Self::new(MutationKind::Delete, target_id, FieldMap::new())
    }

    pub fn set_flag(target_id: impl Into<String>, flag: impl Into<String>, value: bool) -> Self {
        let mut payload = FieldMap::new();
        payload.insert(flag.into(), serde_json::Value::Bool(value));
        Self::new(MutationKind::SetFlag, target_id, payload)
    }
}

/// The unit stored in the offline queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Unique identifier, immutable once assigned
    pub id: MutationId,
    pub kind: MutationKind,
    /// Record being mutated
    pub target_id: String,
    /// Kind-specific fields (partial field map for updates)
    pub payload: FieldMap,
    /// Client-side enqueue timestamp (Unix ms)
    pub created_at: i64,
    /// Drain priority derived from `kind`
    pub priority: i32,
    pub status: MutationStatus,
    /// Failed send attempts so far
    pub retry_count: u32,
    /// Diagnostic, only present while `status` is `Failed`
    pub last_error: Option<String>,
    /// Earliest time (Unix ms) a failed mutation may be retried by a drain
    pub next_attempt_at: Option<i64>,
}

impl MutationRecord {
    /// Build a pending record from a submitted mutation.
    #[must_use]
    pub fn from_new(mutation: NewMutation, created_at: i64) -> Self {
        Self {
            id: MutationId::new(),
            priority: mutation.kind.priority(),
            kind: mutation.kind,
            target_id: mutation.target_id,
            payload: mutation.payload,
            created_at,
            status: MutationStatus::Pending,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
        }
    }

    /// Whether this record is parked waiting for a manual conflict decision.
    pub fn awaits_manual_resolution(&self) -> bool {
        self.status == MutationStatus::Failed
            && self.last_error.as_deref() == Some(MANUAL_CONFLICT_ERROR)
    }

    /// Whether the retry budget is spent; such records are never retried.
    pub const fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count > max_retries
    }

    /// Drain ordering: priority descending, then enqueue order.
    pub fn drain_order(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mutation_id_unique() {
        let id1 = MutationId::new();
        let id2 = MutationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_mutation_id_parse() {
        let id = MutationId::new();
        let parsed: MutationId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_priority_table() {
        assert!(MutationKind::Delete.priority() > MutationKind::SetFlag.priority());
        assert!(MutationKind::SetFlag.priority() > MutationKind::Update.priority());
        assert!(MutationKind::Update.priority() > MutationKind::Create.priority());
    }

    #[test]
    fn test_kind_and_status_round_trip_through_strings() {
        for kind in [
            MutationKind::Create,
            MutationKind::Update,
            MutationKind::Delete,
            MutationKind::SetFlag,
        ] {
            assert_eq!(kind.as_str().parse::<MutationKind>().unwrap(), kind);
        }
        assert_eq!(
            "in_flight".parse::<MutationStatus>().unwrap(),
            MutationStatus::InFlight
        );
        assert!("bogus".parse::<MutationStatus>().is_err());
    }

    #[test]
    fn test_from_new_assigns_priority_and_pending() {
        let mut payload = FieldMap::new();
        payload.insert("quantity".to_string(), json!(2));
        let record = MutationRecord::from_new(NewMutation::update("x", payload), 10);

        assert_eq!(record.priority, MutationKind::Update.priority());
        assert_eq!(record.status, MutationStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn test_drain_order_prefers_priority_then_age() {
        let create = MutationRecord::from_new(NewMutation::create("a", FieldMap::new()), 1);
        let delete = MutationRecord::from_new(NewMutation::delete("b"), 2);
        let older_update = MutationRecord::from_new(NewMutation::update("c", FieldMap::new()), 3);
        let newer_update = MutationRecord::from_new(NewMutation::update("d", FieldMap::new()), 4);

        let mut records = vec![
            newer_update.clone(),
            create.clone(),
            older_update.clone(),
            delete.clone(),
        ];
        records.sort_by(MutationRecord::drain_order);

        let order: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(
            order,
            vec![delete.id, older_update.id, newer_update.id, create.id]
        );
    }

    #[test]
    fn test_exhaustion_is_strictly_beyond_cap() {
        let mut record = MutationRecord::from_new(NewMutation::delete("x"), 0);
        record.retry_count = 10;
        assert!(!record.is_exhausted(10));
        record.retry_count = 11;
        assert!(record.is_exhausted(10));
    }
}
