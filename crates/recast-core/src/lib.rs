//! # Recast Core
//!
//! Scan-then-rewrite migration engine for Java sources, including:
//! - a lossless syntax tree and a tree-sitter based parser
//! - symbol and alias resolution for tracked transaction types
//! - a concurrent fact accumulator shared by every unit of a run
//! - a rule-chain classifier deciding LINEAR vs COMPLEX demarcation
//! - a rewrite engine that either migrates a declaration or marks it for
//!   manual review
//!
//! The [`engine::Pipeline`] drives the phases; [`engine::FileMigrator`] adds
//! reading and writing files around it.

#![warn(clippy::all)]

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub mod ast;
pub mod classifier;
pub mod engine;
pub mod errors;
pub mod facts;
pub mod module_config;
pub mod parser;
pub mod recipes;
pub mod rewrite;
pub mod symbols;

// Re-export commonly used types
pub use ast::{NodePath, SyntaxNode, ToSource, TreeBuilder};
pub use classifier::{classify, Category, ClassificationOutcome, Rule};
pub use engine::{Change, FileMigrator, Pipeline, RunReport, SourceInput, UnitOutput};
pub use errors::{ConversionError, PipelineError, RewriteError};
pub use facts::{FactStore, Facts};
pub use module_config::{DeclaredStrategy, LayoutProvider, ModuleConfigProvider};
pub use parser::{create_parser, JavaParser, ParseError, Parser};
pub use rewrite::{DiagnosticMarker, RewriteEngine};

/// Recast version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for recast components
pub fn init_tracing() {
    init_tracing_with("recast_core=info");
}

/// Initialize tracing with a fallback directive used when `RUST_LOG` is unset.
pub fn init_tracing_with(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    // a subscriber installed earlier, e.g. by a test harness, stays in place
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecastConfig {
    /// Worker threads; 0 lets rayon decide
    pub jobs: usize,
    /// Rewrite and mark test sources too
    pub include_tests: bool,
    /// Recipes to run; empty means all
    pub recipes: Vec<String>,
    /// Declared strategy per module name
    pub strategies: BTreeMap<String, String>,
    /// Fully qualified name of the review marker annotation
    pub marker_annotation: String,
    /// Generate a transaction configuration class where one is missing
    pub generate_config: bool,
    pub config_class_name: String,
    /// Enable debug mode
    pub debug: bool,
}

impl Default for RecastConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            include_tests: false,
            recipes: Vec::new(),
            strategies: BTreeMap::new(),
            marker_annotation: rewrite::DEFAULT_MARKER.to_string(),
            generate_config: true,
            config_class_name: "TransactionConfig".to_string(),
            debug: false,
        }
    }
}

impl RecastConfig {
    /// Load a configuration from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RecastError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Error types for recast operations
#[derive(thiserror::Error, Debug)]
pub enum RecastError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for recast operations
pub type Result<T> = std::result::Result<T, RecastError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_configuration_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "jobs": 2, "strategies": {{ "orders": "mark-only" }} }}"#).unwrap();
        let config = RecastConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.jobs, 2);
        assert_eq!(config.strategies.get("orders").map(String::as_str), Some("mark-only"));
        assert_eq!(config.config_class_name, "TransactionConfig");
        assert!(config.generate_config);
    }

    #[test]
    fn malformed_configuration_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ jobs: ").unwrap();
        assert!(matches!(
            RecastConfig::from_json_file(file.path()),
            Err(RecastError::Config(_))
        ));
        assert!(matches!(
            RecastConfig::from_json_file("/nonexistent/recast.json"),
            Err(RecastError::Io { .. })
        ));
    }
}
