use std::path::Path;

use pantry_core::config::EngineConfig;

use crate::cli::QueueFilter;
use crate::commands::common::{
    display_state, format_mutation_lines, mutation_to_list_item, open_queue, MutationListItem,
};
use crate::error::CliError;

pub async fn run_list(
    state: Option<QueueFilter>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
    config: &EngineConfig,
) -> Result<(), CliError> {
    let queue = open_queue(db_path, config)?;
    let max_retries = config.queue.max_retries;

    let mut records = queue.records().await?;
    records.sort_by(pantry_core::MutationRecord::drain_order);
    let records = records
        .into_iter()
        .filter(|record| state.map_or(true, |filter| display_state(record, max_retries) == filter))
        .take(limit)
        .collect::<Vec<_>>();

    if as_json {
        let json_items = records
            .iter()
            .map(|record| mutation_to_list_item(record, max_retries))
            .collect::<Vec<MutationListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if records.is_empty() {
        println!("Queue is empty");
    } else {
        for line in format_mutation_lines(&records, max_retries) {
            println!("{line}");
        }
    }

    Ok(())
}
