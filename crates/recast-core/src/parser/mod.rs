// Parser module - turns source text into the shared syntax tree
use std::path::Path;
use std::sync::Arc;

use crate::ast::SyntaxNode;

pub mod java;

pub use java::JavaParser;

/// Errors raised while producing a syntax tree.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("failed to load {language} grammar: {message}")]
    Language { language: String, message: String },

    #[error("parser produced no tree")]
    NoTree,

    #[error("syntax error at line {line}, column {column}: {snippet}")]
    Syntax {
        line: usize,
        column: usize,
        snippet: String,
    },

    #[error("tree does not reproduce its source text")]
    Lossy,

    #[error("unknown parser '{0}'")]
    UnknownParser(String),
}

/// Trait for source parsers
pub trait Parser: Send {
    /// Parse a complete compilation unit.
    fn parse(&mut self, source: &str) -> Result<Arc<SyntaxNode>, ParseError>;

    /// Parse a file
    fn parse_file(&mut self, path: &Path) -> anyhow::Result<Arc<SyntaxNode>> {
        let source = std::fs::read_to_string(path)?;
        Ok(self.parse(&source)?)
    }

    /// Get parser name for debugging
    fn name(&self) -> &'static str;
}

/// Create a parser for the named language
pub fn create_parser(language: &str) -> Result<Box<dyn Parser>, ParseError> {
    match language {
        "java" => Ok(Box::new(JavaParser::new()?)),
        other => Err(ParseError::UnknownParser(other.to_string())),
    }
}
