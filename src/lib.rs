//! Keelson - An index and integrity engine for signed governance ledgers.
//!
//! This library provides the core functionality for the `kn` CLI tool:
//! loading signed ledger records, deriving task states, enriching tasks,
//! verifying checksums and signatures, and caching the result as one snapshot.

pub mod cli;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod indexer;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod storage;

/// Library-level error type for Keelson operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not initialized: run `kn init` first")]
    NotInitialized,

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A metrics provider failed; the message is the provider's own.
    #[error("{0}")]
    Metrics(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Keelson operations.
pub type Result<T> = std::result::Result<T, Error>;
