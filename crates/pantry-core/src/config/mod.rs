//! Engine configuration.
//!
//! Every section has defaults, so an empty JSON object (or no file at all)
//! yields a working configuration. `PANTRY_*` environment variables override
//! individual values after the file is read.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conflict::{RecordSchema, DEFAULT_LWW_THRESHOLD_MS, DEFAULT_MAX_DEPTH};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub resolver: ResolverConfig,
    pub sync: SyncConfig,
    pub schema: RecordSchema,
}

/// Retry, backoff and size limits of the offline queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Failed sends allowed before a mutation is permanently failed
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Queue length above which reclaimable records are evicted on enqueue
    pub soft_cap: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            soft_cap: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Minimum gap between edits for per-field last-write-wins
    pub lww_threshold_ms: i64,
    /// Nesting depth for deep value comparison
    pub max_compare_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lww_threshold_ms: DEFAULT_LWW_THRESHOLD_MS,
            max_compare_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Identifier written into local snapshots; breaks timestamp ties
    pub client_id: String,
    /// How long `Synced`/`Failed` stay visible before returning to `Idle`
    pub status_display_ms: u64,
    /// Consecutive failed cycles before triggers are short-circuited
    pub breaker_threshold: u32,
    pub breaker_cool_down_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: "local".to_string(),
            status_display_ms: 3_000,
            breaker_threshold: 3,
            breaker_cool_down_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub const fn status_display(&self) -> Duration {
        Duration::from_millis(self.status_display_ms)
    }

    pub const fn breaker_cool_down(&self) -> Duration {
        Duration::from_millis(self.breaker_cool_down_ms)
    }
}

impl EngineConfig {
    /// Read a JSON config file. Environment overrides are not applied.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&raw)?;
        tracing::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PANTRY_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        self.apply_overrides(|name| values.get(name).cloned())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        override_number(&lookup, "PANTRY_MAX_RETRIES", &mut self.queue.max_retries)?;
        override_number(&lookup, "PANTRY_INITIAL_BACKOFF_MS", &mut self.queue.initial_backoff_ms)?;
        override_number(&lookup, "PANTRY_MAX_BACKOFF_MS", &mut self.queue.max_backoff_ms)?;
        override_number(&lookup, "PANTRY_SOFT_CAP", &mut self.queue.soft_cap)?;
        override_number(&lookup, "PANTRY_LWW_THRESHOLD_MS", &mut self.resolver.lww_threshold_ms)?;
        override_number(&lookup, "PANTRY_STATUS_DISPLAY_MS", &mut self.sync.status_display_ms)?;
        override_number(&lookup, "PANTRY_BREAKER_THRESHOLD", &mut self.sync.breaker_threshold)?;
        override_number(
            &lookup,
            "PANTRY_BREAKER_COOL_DOWN_MS",
            &mut self.sync.breaker_cool_down_ms,
        )?;
        if let Some(client_id) = optional_trimmed(&lookup, "PANTRY_CLIENT_ID") {
            self.sync.client_id = client_id;
        }
        self.validate()
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let queue = &self.queue;
        if queue.initial_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "queue.initial_backoff_ms must be > 0".to_string(),
            ));
        }
        if queue.max_backoff_ms < queue.initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "queue.max_backoff_ms must be >= queue.initial_backoff_ms".to_string(),
            ));
        }
        if queue.soft_cap == 0 {
            return Err(ConfigError::Invalid("queue.soft_cap must be > 0".to_string()));
        }
        if self.resolver.lww_threshold_ms < 0 {
            return Err(ConfigError::Invalid(
                "resolver.lww_threshold_ms must be >= 0".to_string(),
            ));
        }
        if self.sync.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("sync.client_id must not be empty".to_string()));
        }
        if self.sync.breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "sync.breaker_threshold must be > 0".to_string(),
            ));
        }
        self.schema
            .check()
            .map_err(|reason| ConfigError::Invalid(format!("schema: {reason}")))
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = optional_trimmed(lookup, name) {
        *target = raw
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{name} must be a number, got '{raw}'")))?;
    }
    Ok(())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.queue.max_retries, 10);
        assert_eq!(config.resolver.lww_threshold_ms, 300_000);
        assert_eq!(config.sync.status_display(), Duration::from_secs(3));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{"queue": {"max_retries": 3}, "sync": {"client_id": "phone"}}"#)
                .unwrap();
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.max_backoff_ms, 60_000);
        assert_eq!(config.sync.client_id, "phone");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = EngineConfig::from_json_str(r#"{"queue": {"retries": 3}}"#).unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn validate_rejects_inverted_backoff() {
        let error = EngineConfig::from_json_str(
            r#"{"queue": {"initial_backoff_ms": 5000, "max_backoff_ms": 1000}}"#,
        )
        .unwrap_err();
        assert!(error.to_string().contains("max_backoff_ms"));
    }

    #[test]
    fn validate_rejects_untracked_critical_field() {
        let error =
            EngineConfig::from_json_str(r#"{"schema": {"critical_fields": ["aisle"]}}"#).unwrap_err();
        assert!(error.to_string().contains("aisle"));
    }

    #[test]
    fn overrides_replace_values() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(overrides(&[
                ("PANTRY_MAX_RETRIES", "4"),
                ("PANTRY_CLIENT_ID", " tablet "),
                ("PANTRY_SOFT_CAP", ""),
            ]))
            .unwrap();
        assert_eq!(config.queue.max_retries, 4);
        assert_eq!(config.sync.client_id, "tablet");
        assert_eq!(config.queue.soft_cap, 10_000);
    }

    #[test]
    fn overrides_reject_non_numeric_values() {
        let mut config = EngineConfig::default();
        let error = config
            .apply_overrides(overrides(&[("PANTRY_BREAKER_THRESHOLD", "many")]))
            .unwrap_err();
        assert!(error.to_string().contains("PANTRY_BREAKER_THRESHOLD"));
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("pantry.json");
        std::fs::write(&path, r#"{"resolver": {"lww_threshold_ms": 60000}}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.resolver.lww_threshold_ms, 60_000);

        let missing = EngineConfig::load(tmp.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
