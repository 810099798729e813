use pantry_core::config::EngineConfig;
use pantry_core::{MutationId, MutationKind, MutationRecord, MutationStatus, NewMutation};
use serde_json::json;
use tempfile::tempdir;

use crate::cli::{CompletionShell, QueueFilter};
use crate::commands::common::{
    display_state, format_mutation_lines, format_relative_time, format_sync_timestamp,
    load_config, open_ledger, open_queue, parse_assignment, parse_assignments,
    resolve_mutation_id,
};
use crate::commands::completions::render_completions;
use crate::commands::discard::run_discard;
use crate::commands::enqueue::run_enqueue;
use crate::error::CliError;

fn record_with_id(id: &str, target: &str) -> MutationRecord {
    let mut record = MutationRecord::from_new(
        NewMutation::update(target, json!({"name": "Milk"}).as_object().cloned().unwrap_or_default()),
        1_000,
    );
    record.id = id.parse().unwrap();
    record
}

#[test]
fn parse_assignment_reads_json_values() {
    assert_eq!(parse_assignment("quantity=2").unwrap(), ("quantity".to_string(), json!(2)));
    assert_eq!(parse_assignment("gotten=true").unwrap(), ("gotten".to_string(), json!(true)));
    assert_eq!(parse_assignment("tags=[\"a\"]").unwrap(), ("tags".to_string(), json!(["a"])));
}

#[test]
fn parse_assignment_falls_back_to_plain_text() {
    assert_eq!(
        parse_assignment("name=Oat milk").unwrap(),
        ("name".to_string(), json!("Oat milk"))
    );
    assert_eq!(parse_assignment("notes=").unwrap(), ("notes".to_string(), json!("")));
}

#[test]
fn parse_assignment_rejects_missing_field() {
    assert!(matches!(parse_assignment("quantity"), Err(CliError::InvalidAssignment(_))));
    assert!(matches!(parse_assignment(" =2"), Err(CliError::InvalidAssignment(_))));
}

#[test]
fn parse_assignments_keeps_last_value_per_field() {
    let payload =
        parse_assignments(&["quantity=1".to_string(), "quantity=3".to_string()]).unwrap();
    assert_eq!(payload.get("quantity"), Some(&json!(3)));
    assert_eq!(payload.len(), 1);
}

#[test]
fn resolve_mutation_id_accepts_full_id_and_unique_prefix() {
    let records = vec![
        record_with_id("0190a1b2-0000-7000-8000-000000000001", "item-1"),
        record_with_id("0190c3d4-0000-7000-8000-000000000002", "item-2"),
    ];

    let full = resolve_mutation_id("0190a1b2-0000-7000-8000-000000000001", &records).unwrap();
    assert_eq!(full, records[0].id);

    let prefixed = resolve_mutation_id("0190c3", &records).unwrap();
    assert_eq!(prefixed, records[1].id);
}

#[test]
fn resolve_mutation_id_reports_ambiguous_and_missing() {
    let records = vec![
        record_with_id("0190a1b2-0000-7000-8000-000000000001", "item-1"),
        record_with_id("0190a1b2-0000-7000-8000-000000000002", "item-2"),
    ];

    let ambiguous = resolve_mutation_id("0190a1", &records).unwrap_err();
    assert!(matches!(ambiguous, CliError::AmbiguousMutationId(_)));
    assert!(ambiguous.to_string().contains("0190a1"));

    assert!(matches!(
        resolve_mutation_id("ffff", &records),
        Err(CliError::MutationNotFound(_))
    ));
    assert!(matches!(
        resolve_mutation_id("   ", &records),
        Err(CliError::EmptyMutationId)
    ));
}

#[test]
fn display_state_separates_held_and_exhausted() {
    let mut record = record_with_id("0190a1b2-0000-7000-8000-000000000001", "item-1");
    assert_eq!(display_state(&record, 10), QueueFilter::Pending);

    record.status = MutationStatus::Failed;
    record.retry_count = 2;
    record.last_error = Some("timeout".to_string());
    assert_eq!(display_state(&record, 10), QueueFilter::Failed);

    record.retry_count = 11;
    assert_eq!(display_state(&record, 10), QueueFilter::Exhausted);

    record.last_error = Some(pantry_core::models::MANUAL_CONFLICT_ERROR.to_string());
    assert_eq!(display_state(&record, 10), QueueFilter::Held);
}

#[test]
fn format_mutation_lines_show_failure_reason() {
    let mut record = record_with_id("0190a1b2-0000-7000-8000-000000000001", "item-1");
    record.status = MutationStatus::Failed;
    record.retry_count = 1;
    record.last_error = Some("timeout".to_string());

    let lines = format_mutation_lines(&[record], 10);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("0190a1b2-0000"));
    assert!(lines[0].contains("failed"));
    assert!(lines[0].ends_with("(timeout)"));
}

#[test]
fn format_sync_timestamp_renders_utc() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
    assert_eq!(format_sync_timestamp(1_700_000_000_000), "2023-11-14 22:13:20 UTC");
}

#[test]
fn format_relative_time_buckets() {
    let now = 10 * 86_400_000;
    assert_eq!(format_relative_time(now - 5_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
}

#[test]
fn completions_name_the_binary() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("pantry"));
}

#[test]
fn load_config_reads_explicit_file() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("pantry.json");
    std::fs::write(&path, r#"{"queue": {"max_retries": 4}}"#).unwrap();

    let config = load_config(Some(path.as_path())).unwrap();
    assert_eq!(config.queue.max_retries, 4);

    let missing = load_config(Some(tmp.path().join("missing.json").as_path())).unwrap_err();
    assert!(matches!(missing, CliError::Config(_)));
}

#[tokio::test]
async fn enqueue_persists_to_database_file() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("nested").join("pantry.db");
    let config = EngineConfig::default();

    run_enqueue(
        MutationKind::Update,
        "item-1",
        &["quantity=2".to_string(), "name=Milk".to_string()],
        &db_path,
        &config,
    )
    .await
    .unwrap();
    run_enqueue(
        MutationKind::Update,
        "item-1",
        &["quantity=3".to_string()],
        &db_path,
        &config,
    )
    .await
    .unwrap();

    let queue = open_queue(&db_path, &config).unwrap();
    let records = queue.records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload.get("quantity"), Some(&json!(3)));
    assert_eq!(records[0].payload.get("name"), Some(&json!("Milk")));
}

#[tokio::test]
async fn enqueue_rejects_malformed_flag() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("pantry.db");

    let error = run_enqueue(
        MutationKind::SetFlag,
        "item-1",
        &["gotten=maybe".to_string()],
        &db_path,
        &EngineConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(error, CliError::Queue(_)));
}

#[tokio::test]
async fn discard_refuses_live_mutation() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("pantry.db");
    let config = EngineConfig::default();

    let queue = open_queue(&db_path, &config).unwrap();
    let id: MutationId = queue
        .enqueue(NewMutation::delete("item-9"))
        .await
        .unwrap()
        .id();
    drop(queue);

    let error = run_discard(&id.to_string(), &db_path, &config).await.unwrap_err();
    assert!(matches!(error, CliError::Queue(_)));
}

#[tokio::test]
async fn ledger_opens_alongside_queue() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("pantry.db");
    let _queue = open_queue(&db_path, &EngineConfig::default()).unwrap();

    let ledger = open_ledger(&db_path).unwrap();
    assert!(ledger.pending_conflicts().await.unwrap().is_empty());
    assert_eq!(ledger.sync_metadata().await.unwrap().last_sync_timestamp, None);
}
