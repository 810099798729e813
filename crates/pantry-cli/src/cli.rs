use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pantry_core::MutationKind;

#[derive(Parser)]
#[command(name = "pantry")]
#[command(about = "Inspect and manage the Pantry offline mutation queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional engine config file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show queue counts and last sync
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued mutations
    List {
        /// Only show mutations in this state
        #[arg(long, value_enum)]
        state: Option<QueueFilter>,
        /// Number of mutations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue a mutation
    #[command(alias = "add")]
    Enqueue {
        /// Mutation kind: create, update, delete or set_flag
        #[arg(value_parser = parse_kind)]
        kind: MutationKind,
        /// Target record ID
        target: String,
        /// Field assignment, repeatable (e.g. --set quantity=2 --set name=Milk)
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        fields: Vec<String>,
    },
    /// Return retryable failed mutations to the queue
    Retry,
    /// Remove a permanently failed mutation
    Discard {
        /// Mutation ID or unique ID prefix
        id: String,
    },
    /// Drop mutations that were resolved automatically
    Sweep,
    /// List conflicts waiting for a manual decision
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the resolution log
    Log {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only show entries of this conflict
        #[arg(long, value_name = "ID")]
        conflict: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum QueueFilter {
    Pending,
    InFlight,
    Failed,
    Held,
    Exhausted,
    Resolved,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn parse_kind(raw: &str) -> Result<MutationKind, String> {
    raw.parse()
}
