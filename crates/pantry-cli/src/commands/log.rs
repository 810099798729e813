use std::path::Path;

use pantry_core::ConflictId;

use crate::commands::common::{format_log_lines, log_entry_to_item, open_ledger, ResolutionLogItem};
use crate::error::CliError;

pub async fn run_log(
    limit: usize,
    conflict: Option<&str>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let ledger = open_ledger(db_path)?;
    let entries = match conflict {
        Some(raw) => {
            let id = raw
                .trim()
                .parse::<ConflictId>()
                .map_err(|_| CliError::InvalidConflictId(raw.to_string()))?;
            ledger.resolution_history(&id).await?
        }
        None => ledger.resolution_log(limit).await?,
    };

    if as_json {
        let json_items = entries
            .iter()
            .map(log_entry_to_item)
            .collect::<Vec<ResolutionLogItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if entries.is_empty() {
        println!("No resolutions recorded");
    } else {
        for line in format_log_lines(&entries) {
            println!("{line}");
        }
    }

    Ok(())
}
