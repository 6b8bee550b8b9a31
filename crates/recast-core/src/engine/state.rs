//! Per-unit lifecycle tracking.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::errors::PipelineError;

/// Where a unit is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitState {
    Unscanned,
    Scanned,
    Classified,
    /// At least one declaration was rewritten.
    Rewritten,
    /// Only markers were added.
    Marked,
    Untouched,
    Cleaned,
    /// The unit keeps its original text.
    Failed,
}

impl UnitState {
    pub fn can_advance_to(self, next: UnitState) -> bool {
        use UnitState::*;
        matches!(
            (self, next),
            (Unscanned, Scanned)
                | (Scanned, Classified)
                | (Classified, Rewritten | Marked | Untouched)
                | (Rewritten | Marked | Untouched, Cleaned)
                | (_, Failed)
        ) && self != Failed
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Cleaned | UnitState::Failed)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitState::Unscanned => "unscanned",
            UnitState::Scanned => "scanned",
            UnitState::Classified => "classified",
            UnitState::Rewritten => "rewritten",
            UnitState::Marked => "marked",
            UnitState::Untouched => "untouched",
            UnitState::Cleaned => "cleaned",
            UnitState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one input unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitRecord {
    pub path: PathBuf,
    pub state: UnitState,
    /// State reached before cleanup, kept for the report.
    pub disposition: Option<UnitState>,
    pub error: Option<String>,
}

impl UnitRecord {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: UnitState::Unscanned,
            disposition: None,
            error: None,
        }
    }

    pub fn advance(&mut self, next: UnitState) -> Result<(), PipelineError> {
        if !self.state.can_advance_to(next) {
            return Err(PipelineError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if matches!(next, UnitState::Rewritten | UnitState::Marked | UnitState::Untouched) {
            self.disposition = Some(next);
        }
        self.state = next;
        Ok(())
    }

    /// Mark the unit failed; it keeps its original text.
    pub fn fail(&mut self, error: impl fmt::Display) {
        self.error = Some(error.to_string());
        if self.state != UnitState::Failed {
            self.state = UnitState::Failed;
        }
    }
}
