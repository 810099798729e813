use std::path::Path;

use pantry_core::config::EngineConfig;
use pantry_core::queue::EnqueueOutcome;
use pantry_core::{MutationKind, NewMutation};

use crate::commands::common::{open_queue, parse_assignments};
use crate::error::CliError;

pub async fn run_enqueue(
    kind: MutationKind,
    target: &str,
    fields: &[String],
    db_path: &Path,
    config: &EngineConfig,
) -> Result<(), CliError> {
    let payload = parse_assignments(fields)?;
    let queue = open_queue(db_path, config)?;

    match queue.enqueue(NewMutation::new(kind, target, payload)).await? {
        EnqueueOutcome::Appended { id, superseded } => {
            println!("{id}");
            if superseded > 0 {
                println!("Superseded {superseded} earlier mutation(s) for {target}");
            }
        }
        EnqueueOutcome::Coalesced { id } => {
            println!("{id}");
            println!("Merged into pending mutation for {target}");
        }
    }

    Ok(())
}
