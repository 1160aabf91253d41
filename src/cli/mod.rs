//! CLI argument definitions for Keelson.

use clap::{Parser, Subcommand};

/// Keelson - index and integrity engine for signed governance ledgers.
///
/// Start with `kn index generate`, then read the result with `kn index show`.
#[derive(Parser, Debug)]
#[command(name = "kn")]
#[command(
    author,
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("KN_GIT_COMMIT"),
        ", built ",
        env!("KN_BUILD_TIMESTAMP"),
        ")"
    ),
    about = "Index and verify a signed governance ledger",
    long_about = None
)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Run as if kn was started in <path> instead of the current directory.
    /// The path must exist. Bypasses git root detection.
    /// Can also be set via KN_REPO environment variable.
    #[arg(short = 'C', long = "repo", global = true, env = "KN_REPO")]
    pub repo_path: Option<std::path::PathBuf>,

    /// Snapshot cache key (overrides KN_CACHE_KEY and config.kdl)
    #[arg(long = "cache-key", global = true)]
    pub cache_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the ledger directory layout
    Init,

    /// Index snapshot commands
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },

    /// Show recent ledger activity, newest first
    Activity {
        /// Maximum number of events to show
        #[arg(short = 'n', long, default_value_t = crate::indexer::MAX_ACTIVITY_EVENTS)]
        limit: usize,
    },

    /// Show one task with relationships, metrics and health
    Task {
        /// Task ID (e.g., 1752274500-task-implement-login)
        id: String,
    },
}

/// Index subcommands
#[derive(Subcommand, Debug)]
pub enum IndexCommands {
    /// Rebuild the index snapshot from the ledger
    Generate,

    /// Report whether the snapshot is up to date
    Status,

    /// Print the snapshot if it is up to date
    Show,

    /// Delete the snapshot
    Invalidate,

    /// Verify checksums, signatures and record structure
    Validate,
}
