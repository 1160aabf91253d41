//! KDL schema for the ledger's config.kdl.
//!
//! This module provides:
//! - [`KeelsonConfig`], the parsed file
//! - KDL parsing and serialization
//! - Validation

use crate::{Error, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the config inside the ledger directory.
pub const CONFIG_FILE_NAME: &str = "config.kdl";

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger settings stored in `<ledger>/config.kdl`.
///
/// # KDL Schema
///
/// ```kdl
/// cache-key "index"
/// parallel-enrichment #true
/// log-filter "keelson=debug"
/// output-format "human"  // or "json"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeelsonConfig {
    /// Key of the snapshot in the cache namespace
    pub cache_key: Option<String>,

    /// Enrich tasks on all cores
    pub parallel_enrichment: Option<bool>,

    /// `tracing` filter directive used when `KN_LOG` is unset
    pub log_filter: Option<String>,

    /// Default output format for CLI commands
    pub output_format: Option<OutputFormat>,
}

fn string_arg(doc: &KdlDocument, name: &str) -> Option<String> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_node(name: &str, value: &str) -> KdlNode {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::String(value.to_string())));
    node
}

impl KeelsonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(key) = &self.cache_key {
            if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\', '\0']) {
                return Err(format!("cache-key must be a plain file stem, got {:?}", key));
            }
        }
        if let Some(filter) = &self.log_filter {
            if filter.trim().is_empty() {
                return Err("log-filter must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Unknown nodes are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            cache_key: string_arg(doc, "cache-key"),
            parallel_enrichment: doc
                .get("parallel-enrichment")
                .and_then(|node| node.entries().first())
                .and_then(|e| e.value().as_bool()),
            log_filter: string_arg(doc, "log-filter"),
            output_format: string_arg(doc, "output-format").and_then(|s| OutputFormat::parse(&s)),
        }
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref key) = self.cache_key {
            doc.nodes_mut().push(string_node("cache-key", key));
        }
        if let Some(parallel) = self.parallel_enrichment {
            let mut node = KdlNode::new("parallel-enrichment");
            node.push(KdlEntry::new(KdlValue::Bool(parallel)));
            doc.nodes_mut().push(node);
        }
        if let Some(ref filter) = self.log_filter {
            doc.nodes_mut().push(string_node("log-filter", filter));
        }
        if let Some(format) = self.output_format {
            doc.nodes_mut().push(string_node("output-format", format.as_str()));
        }

        doc
    }

    /// Read `config.kdl` from a ledger directory.
    ///
    /// A missing file yields the empty config.
    pub fn load(ledger_root: &Path) -> Result<Self> {
        let path = ledger_root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(&path)?;
        let doc: KdlDocument = content.parse().map_err(|e| {
            Error::Config(format!("Failed to parse KDL in {}: {}", path.display(), e))
        })?;

        let config = Self::from_kdl(&doc);
        config
            .validate()
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Write `config.kdl` into a ledger directory.
    pub fn save(&self, ledger_root: &Path) -> Result<()> {
        let mut doc = self.to_kdl();
        doc.autoformat();
        std::fs::write(ledger_root.join(CONFIG_FILE_NAME), doc.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("human"), Some(OutputFormat::Human));
        assert_eq!(OutputFormat::parse("yaml"), None);
    }

    #[test]
    fn test_from_kdl_reads_every_field() {
        let doc: KdlDocument = r#"
            cache-key "index-main"
            parallel-enrichment #false
            log-filter "keelson=debug"
            output-format "human"
            unknown-node 42
        "#
        .parse()
        .unwrap();

        let config = KeelsonConfig::from_kdl(&doc);
        assert_eq!(config.cache_key.as_deref(), Some("index-main"));
        assert_eq!(config.parallel_enrichment, Some(false));
        assert_eq!(config.log_filter.as_deref(), Some("keelson=debug"));
        assert_eq!(config.output_format, Some(OutputFormat::Human));
    }

    #[test]
    fn test_kdl_roundtrip() {
        let config = KeelsonConfig {
            cache_key: Some("snapshot".to_string()),
            parallel_enrichment: Some(true),
            log_filter: None,
            output_format: Some(OutputFormat::Json),
        };
        let doc: KdlDocument = config.to_kdl().to_string().parse().unwrap();
        assert_eq!(KeelsonConfig::from_kdl(&doc), config);
    }

    #[test]
    fn test_validate_rejects_path_like_cache_key() {
        let config = KeelsonConfig {
            cache_key: Some("../index".to_string()),
            ..KeelsonConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_and_invalid_files() {
        let dir = TempDir::new().unwrap();
        assert_eq!(KeelsonConfig::load(dir.path()).unwrap(), KeelsonConfig::new());

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "cache-key \"unterminated").unwrap();
        assert!(matches!(
            KeelsonConfig::load(dir.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let config = KeelsonConfig {
            log_filter: Some("info".to_string()),
            ..KeelsonConfig::default()
        };
        config.save(dir.path()).unwrap();
        assert_eq!(KeelsonConfig::load(dir.path()).unwrap(), config);
    }
}
