//! CLI command definitions for the `parley` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod history;
pub mod run;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use parley_types::config::StoreBackend;

/// Chat bot that answers questions with an LLM and remembers each conversation.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON (command output and logs).
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also export trace spans through OpenTelemetry (stdout exporter, development only).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Answer chat events read from stdin as JSON lines; replies are written to stdout.
    Run {
        /// Key-value store backend (overrides config.toml).
        #[arg(long, value_enum)]
        store: Option<StoreArg>,
    },

    /// Inspect or clear a conversation's stored history.
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum HistoryCommand {
    /// Print every stored entry of a conversation.
    Show {
        /// Conversation id.
        conversation: u64,
    },

    /// Delete a conversation's history (takes the conversation lock).
    Reset {
        /// Conversation id.
        conversation: u64,
    },

    /// Keep only the most recent entries, starting at a user entry.
    Trim {
        /// Conversation id.
        conversation: u64,

        /// Entries to keep (defaults to `history.replay_window`).
        #[arg(long)]
        window: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    Memory,
    Sqlite,
}

impl From<StoreArg> for StoreBackend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Memory => StoreBackend::Memory,
            StoreArg::Sqlite => StoreBackend::Sqlite,
        }
    }
}
