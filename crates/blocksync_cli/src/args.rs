use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "blocksync")]
#[command(about = "Local-first time blocks with file exchange and remote sync", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Signed-in user id; anonymous when omitted
    #[arg(short, long, global = true)]
    pub user: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show storage, sync and relay state
    Status,

    /// Relay a completed work block to the shared completion file
    #[command(alias = "c")]
    Complete {
        task_id: String,
        minutes: u32,
        #[arg(short, long)]
        block: Option<String>,
    },

    /// Read the external task list once and print it by priority
    Import {
        /// Only show tasks with this status
        #[arg(short, long)]
        status: Option<String>,
    },

    /// List local tasks
    #[command(alias = "ls")]
    Tasks,

    /// Create a local task
    #[command(alias = "a")]
    AddTask {
        #[arg(required = true)]
        title: Vec<String>,
    },

    /// Fold the update log into a single snapshot
    Compact,
}
