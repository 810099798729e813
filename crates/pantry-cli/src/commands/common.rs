use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use pantry_core::config::EngineConfig;
use pantry_core::db::SqliteQueueStore;
use pantry_core::models::{FieldMap, ResolutionLogEntry};
use pantry_core::queue::QueueManager;
use pantry_core::services::SyncLedger;
use pantry_core::{ConflictRecord, MutationId, MutationRecord, MutationStatus};
use serde::Serialize;

use crate::cli::QueueFilter;
use crate::error::CliError;

pub type LocalQueue = QueueManager<SqliteQueueStore>;

#[derive(Debug, Serialize)]
pub struct MutationListItem {
    pub id: String,
    pub kind: String,
    pub target_id: String,
    pub status: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub relative_time: String,
    pub payload: FieldMap,
}

#[derive(Debug, Serialize)]
pub struct ConflictListItem {
    pub id: String,
    pub target_id: String,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub fields: Vec<String>,
    pub mutation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolutionLogItem {
    pub conflict_id: String,
    pub sequence: i64,
    pub target_id: String,
    pub strategy: String,
    pub resolved_by: Option<String>,
    pub fields: Vec<String>,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("PANTRY_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pantry")
        .join("pantry.db")
}

/// Config file from `--config` or `PANTRY_CONFIG`, then environment overrides.
pub fn load_config(cli_config_path: Option<&Path>) -> Result<EngineConfig, CliError> {
    let path = cli_config_path
        .map(Path::to_path_buf)
        .or_else(|| env::var_os("PANTRY_CONFIG").map(PathBuf::from));

    let mut config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

pub fn open_queue(db_path: &Path, config: &EngineConfig) -> Result<LocalQueue, CliError> {
    ensure_parent_dir(db_path)?;
    let store = SqliteQueueStore::open(db_path)?;
    Ok(QueueManager::open(store, config.queue.clone())?)
}

pub fn open_ledger(db_path: &Path) -> Result<SyncLedger, CliError> {
    ensure_parent_dir(db_path)?;
    Ok(SyncLedger::open_path(db_path)?)
}

fn ensure_parent_dir(db_path: &Path) -> Result<(), CliError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Parse `FIELD=VALUE`; the value is read as JSON and falls back to a plain string.
pub fn parse_assignment(raw: &str) -> Result<(String, serde_json::Value), CliError> {
    let Some((field, value)) = raw.split_once('=') else {
        return Err(CliError::InvalidAssignment(raw.to_string()));
    };
    let field = field.trim();
    if field.is_empty() {
        return Err(CliError::InvalidAssignment(raw.to_string()));
    }

    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((field.to_string(), value))
}

pub fn parse_assignments(raw: &[String]) -> Result<FieldMap, CliError> {
    let mut payload = FieldMap::new();
    for assignment in raw {
        let (field, value) = parse_assignment(assignment)?;
        payload.insert(field, value);
    }
    Ok(payload)
}

pub fn normalize_mutation_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyMutationId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Resolve a full mutation ID or a unique prefix of one.
pub fn resolve_mutation_id(query: &str, records: &[MutationRecord]) -> Result<MutationId, CliError> {
    let query = normalize_mutation_identifier(query)?;
    if let Ok(id) = query.parse::<MutationId>() {
        if records.iter().any(|record| record.id == id) {
            return Ok(id);
        }
    }

    let matching = records
        .iter()
        .filter(|record| record.id.as_str().starts_with(&query))
        .map(|record| record.id)
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::MutationNotFound(query)),
        [id] => Ok(*id),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| id.as_str().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousMutationId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Display state of a record, separating held and exhausted failures.
pub fn display_state(record: &MutationRecord, max_retries: u32) -> QueueFilter {
    match record.status {
        MutationStatus::Pending => QueueFilter::Pending,
        MutationStatus::InFlight => QueueFilter::InFlight,
        MutationStatus::Resolved => QueueFilter::Resolved,
        MutationStatus::Failed if record.awaits_manual_resolution() => QueueFilter::Held,
        MutationStatus::Failed if record.is_exhausted(max_retries) => QueueFilter::Exhausted,
        MutationStatus::Failed => QueueFilter::Failed,
    }
}

pub const fn filter_label(filter: QueueFilter) -> &'static str {
    match filter {
        QueueFilter::Pending => "pending",
        QueueFilter::InFlight => "in_flight",
        QueueFilter::Failed => "failed",
        QueueFilter::Held => "held",
        QueueFilter::Exhausted => "exhausted",
        QueueFilter::Resolved => "resolved",
    }
}

pub fn mutation_to_list_item(record: &MutationRecord, max_retries: u32) -> MutationListItem {
    let now_ms = Utc::now().timestamp_millis();
    MutationListItem {
        id: record.id.to_string(),
        kind: record.kind.to_string(),
        target_id: record.target_id.clone(),
        status: filter_label(display_state(record, max_retries)).to_string(),
        retry_count: record.retry_count,
        last_error: record.last_error.clone(),
        created_at: record.created_at,
        relative_time: format_relative_time(record.created_at, now_ms),
        payload: record.payload.clone(),
    }
}

pub fn format_mutation_lines(records: &[MutationRecord], max_retries: u32) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = record.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let state = filter_label(display_state(record, max_retries));
            let relative_time = format_relative_time(record.created_at, now_ms);
            let line = format!(
                "{short_id:<13}  {:<8}  {state:<9}  {:<20}  {relative_time}",
                record.kind.as_str(),
                truncate(&record.target_id, 20),
            );
            match &record.last_error {
                Some(error) if record.status == MutationStatus::Failed => {
                    format!("{line}  ({error})")
                }
                _ => line,
            }
        })
        .collect()
}

pub fn conflict_to_list_item(conflict: &ConflictRecord) -> ConflictListItem {
    ConflictListItem {
        id: conflict.id.to_string(),
        target_id: conflict.target_id.clone(),
        detected_at: conflict.detected_at,
        detected_at_iso: format_sync_timestamp(conflict.detected_at),
        fields: conflict.fields(),
        mutation_id: conflict.mutation_id.map(|id| id.to_string()),
    }
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  target={}  fields={}",
                format_sync_timestamp(conflict.detected_at),
                conflict.id,
                conflict.target_id,
                conflict.fields().join(",")
            )
        })
        .collect()
}

pub fn log_entry_to_item(entry: &ResolutionLogEntry) -> ResolutionLogItem {
    ResolutionLogItem {
        conflict_id: entry.conflict_id.to_string(),
        sequence: entry.sequence,
        target_id: entry.target_id.clone(),
        strategy: strategy_label(entry).to_string(),
        resolved_by: entry.resolved_by.clone(),
        fields: entry.fields.clone(),
        resolved_at: entry.resolved_at,
        resolved_at_iso: format_sync_timestamp(entry.resolved_at),
    }
}

pub fn format_log_lines(entries: &[ResolutionLogEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let who = entry.resolved_by.as_deref().unwrap_or("engine");
            format!(
                "{}  #{:<4}  {:<20}  target={}  by={who}  fields={}",
                format_sync_timestamp(entry.resolved_at),
                entry.sequence,
                strategy_label(entry),
                entry.target_id,
                entry.fields.join(",")
            )
        })
        .collect()
}

fn strategy_label(entry: &ResolutionLogEntry) -> &'static str {
    entry.strategy.map_or("manual", |strategy| strategy.as_str())
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let mut truncated = value
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
