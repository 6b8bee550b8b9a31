/*!
# Recipes

Core trait for transformation units. A recipe looks at one scanned unit and
the frozen facts and plans which declarations to rewrite or mark. It never
edits a tree itself; the pipeline applies every plan through the shared
rewrite engine.
*/

use serde::Serialize;

use crate::ast::{NodePath, SyntaxNode};
use crate::classifier::ClassificationOutcome;
use crate::errors::RewriteError;
use crate::facts::Facts;

use super::ScannedUnit;

/// Core trait for transformation units
pub trait Recipe: Send + Sync {
    /// Name used on the command line and as the marker category
    fn name(&self) -> &'static str;

    /// Detailed description of what this recipe does
    fn description(&self) -> &'static str;

    /// Priority for recipe ordering (higher priority runs first)
    fn priority(&self) -> u32 {
        100
    }

    /// Check if this recipe has anything to look at in the unit
    fn matches(&self, unit: &ScannedUnit) -> bool;

    /// Classify every candidate declaration of the unit
    fn plan(&self, unit: &ScannedUnit, facts: &Facts) -> Vec<PlannedEdit>;

    /// Optional check on a rewritten declaration
    fn validate(&self, original: &SyntaxNode, rewritten: &SyntaxNode) -> Result<(), RewriteError> {
        let _ = (original, rewritten);
        Ok(())
    }
}

/// A classified declaration waiting to be applied.
#[derive(Debug, Clone)]
pub struct PlannedEdit {
    pub recipe: &'static str,
    /// Declaration node, from the unit root.
    pub path: NodePath,
    /// Human-readable name such as `com.acme.Orders#place`.
    pub declaration: String,
    pub outcome: ClassificationOutcome,
}

/// Recipe execution statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecipeStats {
    pub recipe_name: String,
    /// Declarations classified
    pub candidates: u64,
    /// LINEAR outcomes applied
    pub rewrites: u64,
    /// Markers inserted
    pub markers: u64,
    pub errors: u64,
    pub total_time_ms: u64,
}

impl RecipeStats {
    pub fn new(recipe_name: String) -> Self {
        Self {
            recipe_name,
            ..Default::default()
        }
    }

    /// Share of candidates that were rewritten automatically
    pub fn success_rate(&self) -> f64 {
        if self.candidates == 0 {
            0.0
        } else {
            (self.rewrites as f64) / (self.candidates as f64)
        }
    }

    pub fn average_time_ms(&self) -> f64 {
        if self.candidates == 0 {
            0.0
        } else {
            (self.total_time_ms as f64) / (self.candidates as f64)
        }
    }

    pub fn merge(&mut self, other: &RecipeStats) {
        self.candidates += other.candidates;
        self.rewrites += other.rewrites;
        self.markers += other.markers;
        self.errors += other.errors;
        self.total_time_ms += other.total_time_ms;
    }
}
