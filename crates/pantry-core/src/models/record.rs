//! Record snapshot model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::mutation::{FieldMap, MutationKind, MutationRecord};

/// A full view of one list record, as held locally or returned by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    /// Record identifier shared by every replica
    pub target_id: String,
    /// Field values
    #[serde(default)]
    pub fields: FieldMap,
    /// Per-field modification timestamps (Unix ms); missing fields fall back to `updated_at`
    #[serde(default)]
    pub field_timestamps: BTreeMap<String, i64>,
    /// Last modification timestamp of the whole record (Unix ms)
    pub updated_at: i64,
    /// Identifier of the client that produced this version
    #[serde(default)]
    pub client_id: String,
    /// Server revision, 0 when never acknowledged
    #[serde(default)]
    pub version: i64,
    /// Soft delete flag
    #[serde(default)]
    pub deleted: bool,
}

impl RecordSnapshot {
    /// Create an empty, never-synced snapshot
    pub fn new(target_id: impl Into<String>, client_id: impl Into<String>, updated_at: i64) -> Self {
        Self {
            target_id: target_id.into(),
            fields: FieldMap::new(),
            field_timestamps: BTreeMap::new(),
            updated_at,
            client_id: client_id.into(),
            version: 0,
            deleted: false,
        }
    }

    /// Set a field and stamp it, bumping `updated_at` when newer.
    #[must_use]
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        value: serde_json::Value,
        timestamp: i64,
    ) -> Self {
        self.set_field(name, value, timestamp);
        self
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: serde_json::Value, timestamp: i64) {
        let name = name.into();
        self.field_timestamps.insert(name.clone(), timestamp);
        self.fields.insert(name, value);
        self.updated_at = self.updated_at.max(timestamp);
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    /// Modification time of a single field.
    pub fn field_timestamp(&self, name: &str) -> i64 {
        self.field_timestamps
            .get(name)
            .copied()
            .unwrap_or(self.updated_at)
    }

    /// Produce the next local state after optimistically applying a mutation.
    #[must_use]
    pub fn apply_mutation(&self, mutation: &MutationRecord, client_id: &str, now: i64) -> Self {
        let mut next = self.clone();
        next.client_id = client_id.to_string();
        match mutation.kind {
            MutationKind::Create | MutationKind::Update | MutationKind::SetFlag => {
                next.deleted = false;
                for (name, value) in &mutation.payload {
                    next.set_field(name.clone(), value.clone(), now);
                }
            }
            MutationKind::Delete => {
                next.deleted = true;
            }
        }
        next.updated_at = next.updated_at.max(now);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMutation;
    use serde_json::json;

    #[test]
    fn test_field_timestamp_falls_back_to_updated_at() {
        let snapshot = RecordSnapshot::new("x", "client-a", 500).with_field("name", json!("Milk"), 100);
        assert_eq!(snapshot.field_timestamp("name"), 100);
        assert_eq!(snapshot.field_timestamp("notes"), 500);
    }

    #[test]
    fn test_with_field_bumps_updated_at() {
        let snapshot = RecordSnapshot::new("x", "client-a", 100).with_field("quantity", json!(3), 900);
        assert_eq!(snapshot.updated_at, 900);
        assert_eq!(snapshot.field("quantity"), Some(&json!(3)));
    }

    #[test]
    fn test_apply_update_overlays_payload() {
        let base = RecordSnapshot::new("x", "remote", 100)
            .with_field("name", json!("Milk"), 100)
            .with_field("quantity", json!(1), 100);
        let mut payload = FieldMap::new();
        payload.insert("quantity".to_string(), json!(2));
        let mutation = MutationRecord::from_new(NewMutation::update("x", payload), 200);

        let next = base.apply_mutation(&mutation, "local", 250);

        assert_eq!(next.field("name"), Some(&json!("Milk")));
        assert_eq!(next.field("quantity"), Some(&json!(2)));
        assert_eq!(next.field_timestamp("quantity"), 250);
        assert_eq!(next.field_timestamp("name"), 100);
        assert_eq!(next.client_id, "local");
    }

    #[test]
    fn test_apply_delete_marks_soft_deleted() {
        let base = RecordSnapshot::new("x", "remote", 100).with_field("name", json!("Milk"), 100);
        let mutation = MutationRecord::from_new(NewMutation::delete("x"), 200);

        let next = base.apply_mutation(&mutation, "local", 300);
        assert!(next.deleted);
        assert_eq!(next.updated_at, 300);
        assert_eq!(next.field("name"), Some(&json!("Milk")));
    }
}
