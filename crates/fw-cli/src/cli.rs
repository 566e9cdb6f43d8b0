//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Distributed-computing client monitor.
///
/// Reconstructs a queryable execution history from client logs and live
/// queue snapshots.
#[derive(Debug, Parser)]
#[command(name = "fw", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Parse log files offline and summarize the reconstructed runs.
    Parse {
        /// Log files to parse.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show completed/failed unit counts from the history database.
    History {
        /// Limit to one slot (e.g. `rig-a:00`).
        #[arg(long)]
        slot: Option<String>,

        /// Only count units finished at or after this RFC 3339 time.
        #[arg(long)]
        since: Option<String>,
    },

    /// List configured clients.
    Clients,
}
