//! Programmatic JTA/JPA demarcation to `@Transactional`.

use crate::ast::{node_at, SyntaxNode};
use crate::classifier::{classify, Candidate};
use crate::engine::{PlannedEdit, Recipe, ScannedUnit};
use crate::errors::RewriteError;
use crate::facts::Facts;

pub const NAME: &str = "programmatic-transactions";

/// Replaces `UserTransaction`/`EntityTransaction` begin-commit-rollback
/// blocks with a declarative annotation.
#[derive(Debug, Default)]
pub struct ProgrammaticTransactions;

impl Recipe for ProgrammaticTransactions {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Replace programmatic UserTransaction and EntityTransaction demarcation with @Transactional"
    }

    fn priority(&self) -> u32 {
        200
    }

    fn matches(&self, unit: &ScannedUnit) -> bool {
        unit.scan.references.iter().any(|r| r.call_kind().is_some())
    }

    fn plan(&self, unit: &ScannedUnit, facts: &Facts) -> Vec<PlannedEdit> {
        let mut planned = Vec::new();
        for method in &unit.scan.methods {
            let Some(node) = node_at(&unit.tree, &method.path) else {
                continue;
            };
            let candidate = Candidate::new(node, method, &unit.scan);
            if !candidate.has_calls() {
                continue;
            }
            let outcome = classify(&candidate, facts);
            planned.push(PlannedEdit {
                recipe: NAME,
                path: method.path.clone(),
                declaration: format!("{}#{}", method.class, method.name),
                outcome,
            });
        }
        planned
    }

    fn validate(&self, original: &SyntaxNode, rewritten: &SyntaxNode) -> Result<(), RewriteError> {
        if original.kind() != rewritten.kind() {
            return Err(RewriteError::unexpected(original.kind(), rewritten.kind()));
        }
        if original.child_by_field("body").is_some() && rewritten.child_by_field("body").is_none() {
            return Err(RewriteError::missing(rewritten.kind(), "body"));
        }
        Ok(())
    }
}
