//! Output of one pipeline run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::recipe::RecipeStats;
use super::state::UnitState;
use crate::classifier::Category;

/// How an output unit relates to the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Change {
    Unchanged,
    Modified,
    Generated,
}

/// Full text of one output unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutput {
    pub path: PathBuf,
    pub text: String,
    pub change: Change,
}

/// One classified declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub recipe: String,
    pub declaration: String,
    pub rule: String,
    pub category: Category,
    pub reason: String,
    /// Whether the outcome changed the output.
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub path: PathBuf,
    pub state: UnitState,
    pub disposition: Option<UnitState>,
    pub outcomes: Vec<OutcomeRecord>,
    pub error: Option<String>,
}

/// Result of [`Pipeline::run`](super::Pipeline::run).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub outputs: Vec<UnitOutput>,
    pub units: Vec<UnitReport>,
    /// Module-level findings, such as mixed transaction styles.
    pub diagnostics: Vec<String>,
    pub stats: BTreeMap<String, RecipeStats>,
}

impl RunReport {
    /// BLAKE3 digest over the path and text of every output, in path order.
    pub fn checksum(&self) -> String {
        let mut outputs: Vec<&UnitOutput> = self.outputs.iter().collect();
        outputs.sort_by(|a, b| a.path.cmp(&b.path));
        let mut hasher = blake3::Hasher::new();
        for output in outputs {
            hasher.update(output.path.to_string_lossy().as_bytes());
            hasher.update(&[0]);
            hasher.update(output.text.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn output(&self, path: impl AsRef<Path>) -> Option<&UnitOutput> {
        self.outputs.iter().find(|o| o.path == path.as_ref())
    }

    pub fn changed(&self) -> impl Iterator<Item = &UnitOutput> {
        self.outputs.iter().filter(|o| o.change != Change::Unchanged)
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.state == UnitState::Failed)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.units.iter().flat_map(|u| u.outcomes.iter())
    }

    pub fn success(&self) -> bool {
        self.failures().next().is_none()
    }
}
