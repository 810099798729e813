//! Field-level diffing between local and remote record versions

use serde_json::{Number, Value};

use super::schema::RecordSchema;
use crate::error::DetectorError;
use crate::models::{ConflictId, ConflictOutcome, ConflictRecord, FieldConflict, FieldMap, RecordSnapshot};

/// Pseudo-field reported when one side is soft-deleted and the other is not.
pub const DELETED_FIELD: &str = "_deleted";

/// Default nesting depth for deep comparison
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Compares two versions of a record field by field.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    schema: RecordSchema,
    max_depth: usize,
}

impl ConflictDetector {
    pub const fn new(schema: RecordSchema, max_depth: usize) -> Self {
        Self { schema, max_depth }
    }

    pub const fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Compare `local` against `remote`, stamping the conflict with the current time.
    pub fn detect(
        &self,
        local: &RecordSnapshot,
        remote: &RecordSnapshot,
    ) -> Result<Option<ConflictRecord>, DetectorError> {
        self.detect_at(local, remote, crate::util::now_ms())
    }

    /// Compare `local` against `remote`.
    ///
    /// Returns `None` when every tracked field is equivalent on both sides.
    pub fn detect_at(
        &self,
        local: &RecordSnapshot,
        remote: &RecordSnapshot,
        detected_at: i64,
    ) -> Result<Option<ConflictRecord>, DetectorError> {
        if local.target_id != remote.target_id {
            return Err(DetectorError::IdMismatch {
                local: local.target_id.clone(),
                remote: remote.target_id.clone(),
            });
        }

        let mut field_conflicts: Vec<FieldConflict> = self
            .schema
            .tracked_fields
            .iter()
            .filter(|field| !self.equivalent(local.field(field), remote.field(field)))
            .map(|field| FieldConflict {
                field: field.clone(),
                local_value: local.field(field).cloned().unwrap_or(Value::Null),
                remote_value: remote.field(field).cloned().unwrap_or(Value::Null),
                local_timestamp: local.field_timestamp(field),
                remote_timestamp: remote.field_timestamp(field),
            })
            .collect();

        if local.deleted != remote.deleted {
            field_conflicts.push(FieldConflict {
                field: DELETED_FIELD.to_string(),
                local_value: Value::Bool(local.deleted),
                remote_value: Value::Bool(remote.deleted),
                local_timestamp: local.updated_at,
                remote_timestamp: remote.updated_at,
            });
        }

        if field_conflicts.is_empty() {
            return Ok(None);
        }

        let requires_manual_resolution = field_conflicts
            .iter()
            .any(|conflict| self.schema.is_critical(&conflict.field));

        tracing::debug!(
            target_id = %local.target_id,
            fields = field_conflicts.len(),
            requires_manual_resolution,
            "Detected conflict"
        );

        Ok(Some(ConflictRecord {
            id: ConflictId::new(),
            target_id: local.target_id.clone(),
            detected_at,
            local_version: local.clone(),
            remote_version: remote.clone(),
            field_conflicts,
            requires_manual_resolution,
            resolution: ConflictOutcome::Pending,
            mutation_id: None,
        }))
    }

    /// Tracked fields of `merged` that differ from `base`, with their merged values.
    pub fn diff_fields(&self, base: &RecordSnapshot, merged: &RecordSnapshot) -> FieldMap {
        self.schema
            .tracked_fields
            .iter()
            .filter(|field| !self.equivalent(base.field(field), merged.field(field)))
            .map(|field| {
                let value = merged.field(field).cloned().unwrap_or(Value::Null);
                (field.clone(), value)
            })
            .collect()
    }

    /// Field equivalence: all empty values are equal, otherwise deep equality.
    pub fn equivalent(&self, left: Option<&Value>, right: Option<&Value>) -> bool {
        match (is_empty(left), is_empty(right)) {
            (true, true) => true,
            (false, false) => match (left, right) {
                (Some(left), Some(right)) => deep_equal(left, right, self.max_depth),
                _ => false,
            },
            _ => false,
        }
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(RecordSchema::default(), DEFAULT_MAX_DEPTH)
    }
}

/// Missing, `null` and `""` all mean "no value".
fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

fn deep_equal(left: &Value, right: &Value, depth: usize) -> bool {
    if depth == 0 {
        return left == right;
    }
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| deep_equal(a, b, depth - 1))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, value)| {
                    b.get(key)
                        .is_some_and(|other| deep_equal(value, other, depth - 1))
                })
        }
        _ => left == right,
    }
}

/// Integers compare exactly; a float on either side compares by value.
fn numbers_equal(left: &Number, right: &Number) -> bool {
    if left.is_f64() || right.is_f64() {
        return match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => false,
        };
    }
    match (left.as_i64(), right.as_i64()) {
        (Some(a), Some(b)) => a == b,
        _ => left.as_u64().is_some() && left.as_u64() == right.as_u64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn item(client: &str, at: i64) -> RecordSnapshot {
        RecordSnapshot::new("x", client, at)
            .with_field("name", json!("Milk"), at)
            .with_field("category", json!("Dairy"), at)
            .with_field("quantity", json!(1), at)
    }

    #[test]
    fn test_identical_records_have_no_conflict() {
        let detector = ConflictDetector::default();
        let local = item("a", 100);
        let remote = item("b", 200);
        assert_eq!(detector.detect_at(&local, &remote, 300).unwrap(), None);
    }

    #[test]
    fn test_empty_values_are_equivalent() {
        let detector = ConflictDetector::default();
        let local = item("a", 100).with_field("notes", json!(""), 100);
        let remote = item("b", 200).with_field("notes", Value::Null, 200);
        assert!(detector.detect_at(&local, &remote, 300).unwrap().is_none());

        let missing = item("b", 200);
        assert!(detector.detect_at(&local, &missing, 300).unwrap().is_none());
    }

    #[test]
    fn test_integer_and_float_compare_numerically() {
        let detector = ConflictDetector::default();
        let local = item("a", 100).with_field("price", json!(2), 100);
        let remote = item("b", 100).with_field("price", json!(2.0), 100);
        assert!(detector.detect_at(&local, &remote, 300).unwrap().is_none());
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let detector = ConflictDetector::default();
        let local = item("a", 100).with_field("price", json!(9_007_199_254_740_993_i64), 100);
        let remote = item("b", 100).with_field("price", json!(9_007_199_254_740_992_i64), 100);
        let conflict = detector.detect_at(&local, &remote, 300).unwrap().unwrap();
        assert_eq!(conflict.fields(), vec!["price".to_string()]);

        let huge = item("a", 100).with_field("price", json!(u64::MAX), 100);
        let negative = item("b", 100).with_field("price", json!(-1), 100);
        assert!(detector.detect_at(&huge, &negative, 300).unwrap().is_some());
        assert!(detector.detect_at(&huge, &huge.clone(), 300).unwrap().is_none());
    }

    #[test]
    fn test_nested_values_compared_deeply() {
        let detector = ConflictDetector::default();
        let local = item("a", 100).with_field("unit", json!({"kind": "pack", "size": [6, 12]}), 100);
        let same = item("b", 100).with_field("unit", json!({"size": [6, 12], "kind": "pack"}), 100);
        let different =
            item("b", 100).with_field("unit", json!({"kind": "pack", "size": [6, 24]}), 100);

        assert!(detector.detect_at(&local, &same, 300).unwrap().is_none());
        assert!(detector.detect_at(&local, &different, 300).unwrap().is_some());
    }

    #[test]
    fn test_conflicts_follow_tracked_order_and_flag_critical() {
        let detector = ConflictDetector::default();
        let local = item("a", 100)
            .with_field("quantity", json!(2), 150)
            .with_field("name", json!("Milk"), 100);
        let remote = item("b", 200)
            .with_field("quantity", json!(3), 250)
            .with_field("name", json!("Oat milk"), 250);

        let conflict = detector.detect_at(&local, &remote, 300).unwrap().unwrap();

        assert_eq!(conflict.fields(), vec!["name".to_string(), "quantity".to_string()]);
        assert!(conflict.requires_manual_resolution);
        let quantity = conflict.field_conflict("quantity").unwrap();
        assert_eq!(quantity.local_value, json!(2));
        assert_eq!(quantity.remote_timestamp, 250);
        assert_eq!(conflict.resolution, ConflictOutcome::Pending);
    }

    #[test]
    fn test_non_critical_conflict_is_auto_eligible() {
        let detector = ConflictDetector::default();
        let local = item("a", 100).with_field("quantity", json!(2), 100);
        let remote = item("b", 100).with_field("quantity", json!(5), 100);

        let conflict = detector.detect_at(&local, &remote, 300).unwrap().unwrap();
        assert!(!conflict.requires_manual_resolution);
    }

    #[test]
    fn test_deletion_divergence_is_reported() {
        let detector = ConflictDetector::default();
        let mut local = item("a", 100);
        local.deleted = true;
        let remote = item("b", 200);

        let conflict = detector.detect_at(&local, &remote, 300).unwrap().unwrap();
        assert_eq!(conflict.fields(), vec![DELETED_FIELD.to_string()]);
    }

    #[test]
    fn test_mismatched_targets_are_rejected() {
        let detector = ConflictDetector::default();
        let local = item("a", 100);
        let mut remote = item("b", 100);
        remote.target_id = "y".to_string();

        let error = detector.detect_at(&local, &remote, 300).unwrap_err();
        assert_eq!(
            error,
            DetectorError::IdMismatch {
                local: "x".to_string(),
                remote: "y".to_string(),
            }
        );
    }

    #[test]
    fn test_diff_fields_reports_changed_tracked_fields() {
        let detector = ConflictDetector::default();
        let base = item("b", 100);
        let merged = base
            .clone()
            .with_field("quantity", json!(4), 200)
            .with_field("notes", json!("organic"), 200);

        let diff = detector.diff_fields(&base, &merged);
        assert_eq!(diff.len(), 2);
        assert_eq!(diff.get("quantity"), Some(&json!(4)));
        assert_eq!(diff.get("notes"), Some(&json!("organic")));
    }

    #[test]
    fn test_depth_limit_falls_back_to_exact_equality() {
        let detector = ConflictDetector::new(RecordSchema::default(), 0);
        let local = item("a", 100).with_field("price", json!(2), 100);
        let remote = item("b", 100).with_field("price", json!(2.0), 100);
        assert!(detector.detect_at(&local, &remote, 300).unwrap().is_some());
    }
}
