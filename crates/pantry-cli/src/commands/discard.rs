use std::path::Path;

use pantry_core::config::EngineConfig;

use crate::commands::common::{open_queue, resolve_mutation_id};
use crate::error::CliError;

pub async fn run_discard(id: &str, db_path: &Path, config: &EngineConfig) -> Result<(), CliError> {
    let queue = open_queue(db_path, config)?;
    let records = queue.records().await?;
    let mutation_id = resolve_mutation_id(id, &records)?;

    let discarded = queue.discard(&mutation_id).await?;
    println!(
        "Discarded {} {} for {}",
        discarded.kind, discarded.id, discarded.target_id
    );
    Ok(())
}
