//! Field policy for list records

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boolean-like field whose "completed" value wins over any other value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompletionRule {
    pub field: String,
    #[serde(default = "default_completed_value")]
    pub completed_value: Value,
}

fn default_completed_value() -> Value {
    Value::Bool(true)
}

impl CompletionRule {
    pub fn is_completed(&self, value: Option<&Value>) -> bool {
        value == Some(&self.completed_value)
    }
}

/// Which fields are compared, which need a human, and which can be merged.
///
/// The defaults describe a pantry list item: `name` and `category` identify
/// the item, `notes` is free text, and `gotten` marks it done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordSchema {
    /// Compared fields, in reporting order
    pub tracked_fields: Vec<String>,
    /// Identity-defining fields; any conflict on them escalates
    pub critical_fields: Vec<String>,
    /// Free-text fields merged by union instead of overwrite
    pub mergeable_fields: Vec<String>,
    pub completion: Option<CompletionRule>,
    /// Joins merged text segments
    pub merge_separator: String,
}

impl Default for RecordSchema {
    fn default() -> Self {
        let names = |fields: &[&str]| fields.iter().map(|f| (*f).to_string()).collect();
        Self {
            tracked_fields: names(&[
                "name", "category", "quantity", "unit", "price", "notes", "gotten",
            ]),
            critical_fields: names(&["name", "category"]),
            mergeable_fields: names(&["notes"]),
            completion: Some(CompletionRule {
                field: "gotten".to_string(),
                completed_value: Value::Bool(true),
            }),
            merge_separator: "\n".to_string(),
        }
    }
}

impl RecordSchema {
    pub fn is_tracked(&self, field: &str) -> bool {
        self.tracked_fields.iter().any(|f| f == field)
    }

    pub fn is_critical(&self, field: &str) -> bool {
        self.critical_fields.iter().any(|f| f == field)
    }

    pub fn is_mergeable(&self, field: &str) -> bool {
        self.mergeable_fields.iter().any(|f| f == field)
    }

    pub fn completion_field(&self) -> Option<&str> {
        self.completion.as_ref().map(|rule| rule.field.as_str())
    }

    /// Describe the first inconsistency, if any.
    pub fn check(&self) -> Result<(), String> {
        if self.tracked_fields.is_empty() {
            return Err("schema must track at least one field".to_string());
        }
        let untracked = self
            .critical_fields
            .iter()
            .chain(&self.mergeable_fields)
            .chain(self.completion.as_ref().map(|rule| &rule.field))
            .find(|field| !self.is_tracked(field));
        if let Some(field) = untracked {
            return Err(format!("field '{field}' is not tracked"));
        }
        if let Some(field) = self
            .critical_fields
            .iter()
            .find(|field| self.is_mergeable(field))
        {
            return Err(format!("field '{field}' cannot be both critical and mergeable"));
        }
        Ok(())
    }
}
