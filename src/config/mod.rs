//! Ledger configuration.
//!
//! ## config.kdl - Ledger settings
//!
//! Located at `<repo>/.keelson/config.kdl`. Every entry is optional:
//! - `cache-key` - Key of the index snapshot (default "index")
//! - `parallel-enrichment` - Enrich tasks on all cores (default `#true`)
//! - `log-filter` - `tracing` filter when `KN_LOG` is unset (default "warn")
//! - `output-format` - "json" or "human"
//!
//! ## Precedence
//!
//! CLI flag > environment variable > config.kdl > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    CACHE_KEY_ENV, ConfigOverrides, DEFAULT_LOG_FILTER, LOG_FILTER_ENV, Resolved, ResolvedConfig,
    ValueSource, resolve_config, resolve_config_with_env,
};
pub use schema::{CONFIG_FILE_NAME, KeelsonConfig, OutputFormat};
