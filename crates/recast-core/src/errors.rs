use thiserror::Error;

use crate::ast::NodePath;

/// Failures while synthesizing or splicing nodes.
///
/// A rewrite error never escapes the unit it happened in: the driver keeps the
/// unit's original tree and reports the error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("no node at path {path:?}")]
    InvalidPath { path: NodePath },

    #[error("expected {expected} node, found {actual}")]
    UnexpectedNode { expected: String, actual: String },

    #[error("missing {slot} in {kind}")]
    MissingSlot { kind: String, slot: String },

    #[error("cannot rewrite: {message}")]
    Unsupported { message: String },
}

impl RewriteError {
    pub fn unexpected(expected: &str, actual: &str) -> Self {
        Self::UnexpectedNode {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn missing(kind: &str, slot: &str) -> Self {
        Self::MissingSlot {
            kind: kind.to_string(),
            slot: slot.to_string(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}

/// Failures converting a duration between time units.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("unknown time unit '{0}'")]
    UnknownUnit(String),

    #[error("constant {value} overflows the target range")]
    Overflow { value: String },

    #[error("{value} is not a whole number of {unit}")]
    InexactDivision { value: i64, unit: String },

    #[error("dividing a non-constant expression by {divisor} is not statically safe")]
    UnsafeDivision { divisor: i64 },

    #[error("division by zero in constant expression")]
    DivisionByZero,
}

/// Failures in the pipeline driver itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("illegal unit state transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("unit {path} panicked: {message}")]
    Panicked { path: String, message: String },

    #[error("failed to build worker pool: {0}")]
    Pool(String),
}
