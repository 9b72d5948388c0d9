use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `conclave` - orchestration engine for communicating agent processes.
#[derive(Parser, Debug)]
#[command(name = "conclave")]
#[command(version)]
#[command(about = "Inspect agent definitions and the process store.", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate an agent definition file (TOML or JSON)
    Check {
        /// Path to the definition
        path: PathBuf,

        /// Print the tools each state exposes
        #[arg(long)]
        tools: bool,
    },

    /// Validate a definition and store it in the durable store
    Register {
        /// Path to the definition
        path: PathBuf,
    },

    /// Show the effective configuration
    Status,

    /// Show a stored process record
    Process {
        /// Process id
        process_id: String,
    },

    /// List archived conversations of a process
    Archives {
        /// Process id
        process_id: String,

        /// Print every archived message, not just the summary
        #[arg(long)]
        full: bool,
    },
}
