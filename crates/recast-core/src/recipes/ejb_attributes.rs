//! EJB container-managed transaction attributes to `@Transactional`.

use crate::ast::node_at;
use crate::classifier::{classify_attributes, AttributeTarget};
use crate::engine::{NodeWalker, PatternMatcher, PlannedEdit, Recipe, ScannedUnit};
use crate::facts::Facts;

pub const NAME: &str = "ejb-transaction-attributes";

const ATTRIBUTE_ANNOTATIONS: &[&str] = &["TransactionAttribute", "TransactionTimeout"];

const DECLARATIONS: &[&str] = &[
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "record_declaration",
    "method_declaration",
    "constructor_declaration",
];

/// Maps `@TransactionAttribute` and `@TransactionTimeout` onto
/// `@Transactional(propagation = .., timeout = ..)`.
#[derive(Debug, Default)]
pub struct EjbTransactionAttributes;

impl Recipe for EjbTransactionAttributes {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Replace EJB container-managed transaction attributes with @Transactional"
    }

    fn matches(&self, unit: &ScannedUnit) -> bool {
        NodeWalker::find_first(&unit.tree, &PatternMatcher::annotated_with(ATTRIBUTE_ANNOTATIONS)).is_some()
    }

    fn plan(&self, unit: &ScannedUnit, _facts: &Facts) -> Vec<PlannedEdit> {
        let pattern = PatternMatcher::all(
            PatternMatcher::kind_in(DECLARATIONS),
            PatternMatcher::annotated_with(ATTRIBUTE_ANNOTATIONS),
        );
        let package = unit.imports.package.as_deref();

        let mut planned = Vec::new();
        for path in NodeWalker::find_paths(&unit.tree, &pattern) {
            let Some(node) = node_at(&unit.tree, &path) else {
                continue;
            };
            let method = unit.scan.methods.iter().find(|m| m.path == path);
            let target = AttributeTarget {
                node,
                imports: &unit.imports,
                method,
                has_programmatic_calls: unit.scan.references_in(&path).any(|r| r.call_kind().is_some()),
            };
            let Some(outcome) = classify_attributes(&target) else {
                continue;
            };
            let declaration = match method {
                Some(method) => format!("{}#{}", method.class, method.name),
                None => {
                    let name = node.child_by_field("name").map(|n| n.text()).unwrap_or_default();
                    match package {
                        Some(package) => format!("{package}.{name}"),
                        None => name.to_string(),
                    }
                }
            };
            planned.push(PlannedEdit {
                recipe: NAME,
                path,
                declaration,
                outcome,
            });
        }
        planned
    }
}
