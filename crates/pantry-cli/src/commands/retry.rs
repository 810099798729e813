use std::path::Path;

use pantry_core::config::EngineConfig;

use crate::commands::common::open_queue;
use crate::error::CliError;

pub async fn run_retry(db_path: &Path, config: &EngineConfig) -> Result<(), CliError> {
    let queue = open_queue(db_path, config)?;
    let count = queue.retry_failed().await?;
    println!("Returned {count} failed mutation(s) to the queue");
    Ok(())
}

pub async fn run_sweep(db_path: &Path, config: &EngineConfig) -> Result<(), CliError> {
    let queue = open_queue(db_path, config)?;
    let count = queue.sweep_resolved().await?;
    println!("Removed {count} resolved mutation(s)");
    Ok(())
}
