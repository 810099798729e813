//! Pantry CLI - operator tool for the offline mutation queue
//!
//! Reads and edits the same local database the sync engine uses.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::common::{load_config, resolve_db_path};
use crate::commands::completions::run_completions;
use crate::commands::conflicts::run_conflicts;
use crate::commands::discard::run_discard;
use crate::commands::enqueue::run_enqueue;
use crate::commands::list::run_list;
use crate::commands::log::run_log;
use crate::commands::retry::{run_retry, run_sweep};
use crate::commands::status::run_status;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "pantry=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Status { json }) => run_status(json, &db_path, &config).await?,
        Some(Commands::List { state, limit, json }) => {
            run_list(state, limit, json, &db_path, &config).await?;
        }
        Some(Commands::Enqueue {
            kind,
            target,
            fields,
        }) => run_enqueue(kind, &target, &fields, &db_path, &config).await?,
        Some(Commands::Retry) => run_retry(&db_path, &config).await?,
        Some(Commands::Discard { id }) => run_discard(&id, &db_path, &config).await?,
        Some(Commands::Sweep) => run_sweep(&db_path, &config).await?,
        Some(Commands::Conflicts { json }) => run_conflicts(json, &db_path).await?,
        Some(Commands::Log {
            limit,
            conflict,
            json,
        }) => run_log(limit, conflict.as_deref(), json, &db_path).await?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}
