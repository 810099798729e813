use std::path::Path;

use crate::commands::common::{
    conflict_to_list_item, format_conflict_lines, open_ledger, ConflictListItem,
};
use crate::error::CliError;

pub async fn run_conflicts(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let ledger = open_ledger(db_path)?;
    let conflicts = ledger.pending_conflicts().await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_list_item)
            .collect::<Vec<ConflictListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if conflicts.is_empty() {
        println!("No pending conflicts");
    } else {
        for line in format_conflict_lines(&conflicts) {
            println!("{line}");
        }
    }

    Ok(())
}
