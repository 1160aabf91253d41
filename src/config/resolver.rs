//! Precedence resolution for ledger settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`KN_CACHE_KEY`, `KN_LOG`)
//! 3. `<ledger>/config.kdl`
//! 4. Built-in defaults

use super::schema::{KeelsonConfig, OutputFormat};
use crate::Result;
use crate::indexer::DEFAULT_CACHE_KEY;
use std::path::Path;

/// Environment variable overriding the snapshot cache key.
pub const CACHE_KEY_ENV: &str = "KN_CACHE_KEY";

/// Environment variable holding the `tracing` filter.
pub const LOG_FILTER_ENV: &str = "KN_LOG";

/// Log filter used when nothing else is configured.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from the ledger's config.kdl
    ConfigFile,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile => write!(f, "config"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved settings with source tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub cache_key: Resolved<String>,
    pub parallel_enrichment: Resolved<bool>,
    pub log_filter: Resolved<String>,
    pub output_format: Resolved<OutputFormat>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            cache_key: Resolved::new(DEFAULT_CACHE_KEY.to_string(), ValueSource::Default),
            parallel_enrichment: Resolved::new(true, ValueSource::Default),
            log_filter: Resolved::new(DEFAULT_LOG_FILTER.to_string(), ValueSource::Default),
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
        }
    }
}

impl ResolvedConfig {
    pub fn cache_key(&self) -> &str {
        &self.cache_key.value
    }

    pub fn parallel_enrichment(&self) -> bool {
        self.parallel_enrichment.value
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter.value
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format.value
    }
}

/// CLI-level overrides for config values.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub cache_key: Option<String>,
    pub output_format: Option<OutputFormat>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }
}

/// Resolve settings for a ledger directory using the process environment.
pub fn resolve_config(ledger_root: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    resolve_config_with_env(ledger_root, overrides, |name| std::env::var(name).ok())
}

/// Resolve settings with an explicit environment lookup.
pub fn resolve_config_with_env(
    ledger_root: &Path,
    overrides: &ConfigOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let file = KeelsonConfig::load(ledger_root)?;
    Ok(merge(&file, overrides, env))
}

fn merge(
    file: &KeelsonConfig,
    overrides: &ConfigOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let mut resolved = ResolvedConfig::default();

    // Cache key: CLI > env > file > default
    if let Some(key) = &overrides.cache_key {
        resolved.cache_key = Resolved::new(key.clone(), ValueSource::CliFlag);
    } else if let Some(key) = env(CACHE_KEY_ENV).filter(|k| !k.is_empty()) {
        resolved.cache_key = Resolved::new(key, ValueSource::EnvVar(CACHE_KEY_ENV.to_string()));
    } else if let Some(key) = &file.cache_key {
        resolved.cache_key = Resolved::new(key.clone(), ValueSource::ConfigFile);
    }

    if let Some(parallel) = file.parallel_enrichment {
        resolved.parallel_enrichment = Resolved::new(parallel, ValueSource::ConfigFile);
    }

    // Log filter: env > file > default
    if let Some(filter) = env(LOG_FILTER_ENV).filter(|f| !f.trim().is_empty()) {
        resolved.log_filter =
            Resolved::new(filter, ValueSource::EnvVar(LOG_FILTER_ENV.to_string()));
    } else if let Some(filter) = &file.log_filter {
        resolved.log_filter = Resolved::new(filter.clone(), ValueSource::ConfigFile);
    }

    if let Some(format) = overrides.output_format {
        resolved.output_format = Resolved::new(format, ValueSource::CliFlag);
    } else if let Some(format) = file.output_format {
        resolved.output_format = Resolved::new(format, ValueSource::ConfigFile);
    }

    resolved
}
