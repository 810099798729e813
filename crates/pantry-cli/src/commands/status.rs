use std::path::Path;

use pantry_core::config::EngineConfig;
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, open_ledger, open_queue};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusReport {
    pending: usize,
    failed: usize,
    in_flight: usize,
    resolved: usize,
    exhausted: usize,
    awaiting_resolution: usize,
    outstanding: usize,
    pending_conflicts: usize,
    last_sync_timestamp: Option<i64>,
    last_sync_version: Option<i64>,
}

pub async fn run_status(as_json: bool, db_path: &Path, config: &EngineConfig) -> Result<(), CliError> {
    let queue = open_queue(db_path, config)?;
    let ledger = open_ledger(db_path)?;

    let status = queue.status().await?;
    let conflicts = ledger.pending_conflicts().await?;
    let metadata = ledger.sync_metadata().await?;

    let report = StatusReport {
        pending: status.pending_count,
        failed: status.failed_count,
        in_flight: status.in_flight_count,
        resolved: status.resolved_count,
        exhausted: status.exhausted_count,
        awaiting_resolution: status.awaiting_resolution,
        outstanding: status.outstanding(),
        pending_conflicts: conflicts.len(),
        last_sync_timestamp: metadata.last_sync_timestamp,
        last_sync_version: metadata.last_sync_version,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Database: {}", db_path.display());
    println!(
        "Queue: {} pending, {} failed, {} held, {} exhausted, {} resolved",
        report.pending, report.failed, report.awaiting_resolution, report.exhausted, report.resolved
    );
    println!("Pending conflicts: {}", report.pending_conflicts);
    match report.last_sync_timestamp {
        Some(timestamp) => println!("Last sync: {}", format_sync_timestamp(timestamp)),
        None => println!("Last sync: never"),
    }
    if let Some(version) = report.last_sync_version {
        println!("Last sync version: {version}");
    }

    Ok(())
}
