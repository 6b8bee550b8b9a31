/*!
# Rewrite Engine

Turns a classified declaration into its replacement.

A LINEAR outcome strips the constructs the annotation takes over and adds a
Spring `@Transactional` built through the [`TreeBuilder`]. A COMPLEX outcome
leaves the code alone and prepends a `@ManualReview` marker that quotes the
offending construct verbatim; a declaration that already carries a marker is
returned unchanged.

Imports are never edited here. Every rewrite records what it needs and what
it may have orphaned in [`ImportEdits`]; [`cleanup`] applies them once the
whole unit has been rewritten.
*/

use std::sync::Arc;

use tracing::debug;

use crate::ast::source_gen::{indentation_of, reindent};
use crate::ast::{insert_child, remove_children, SyntaxNode, TreeBuilder};
use crate::classifier::{
    AttributePlan, ClassificationOutcome, DurationValue, ExtractedParameters, LinearPlan,
};
use crate::errors::RewriteError;
use crate::symbols::compact_text;

pub mod cleanup;

pub use cleanup::{cleanup, ImportEdits};

pub const TRANSACTIONAL: &str = "org.springframework.transaction.annotation.Transactional";
pub const PROPAGATION: &str = "org.springframework.transaction.annotation.Propagation";
pub const DEFAULT_MARKER: &str = "io.recast.annotations.ManualReview";

/// Payload of a `@ManualReview` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMarker {
    pub category: String,
    pub reason: String,
    /// Verbatim source of the offending construct.
    pub original: String,
    pub suggestion: String,
}

impl DiagnosticMarker {
    pub fn from_outcome(category: &str, outcome: &ClassificationOutcome) -> Self {
        Self {
            category: category.to_string(),
            reason: outcome.reason.clone(),
            original: outcome.original.clone(),
            suggestion: outcome.rule.suggestion().to_string(),
        }
    }

    pub fn build(&self, builder: &TreeBuilder) -> Arc<SyntaxNode> {
        builder.build_marker(&self.category, &self.reason, &self.original, &self.suggestion)
    }
}

/// Where a new annotation goes among the existing modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Before everything else.
    Leading,
    /// After the last existing annotation.
    AfterAnnotations,
}

#[derive(Debug, Clone)]
pub struct RewriteEngine {
    builder: TreeBuilder,
    marker_fqn: String,
}

impl Default for RewriteEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl RewriteEngine {
    pub fn new(marker_fqn: impl Into<String>) -> Self {
        let marker_fqn = marker_fqn.into();
        let simple = marker_fqn.rsplit('.').next().unwrap_or(&marker_fqn).to_string();
        Self {
            builder: TreeBuilder::new(simple),
            marker_fqn,
        }
    }

    pub fn builder(&self) -> &TreeBuilder {
        &self.builder
    }

    pub fn marker_fqn(&self) -> &str {
        &self.marker_fqn
    }

    /// Rewrite one declaration according to its outcome.
    ///
    /// `category` names the recipe and becomes the marker's category.
    pub fn rewrite(
        &self,
        node: &Arc<SyntaxNode>,
        outcome: &ClassificationOutcome,
        category: &str,
        edits: &mut ImportEdits,
    ) -> Result<Arc<SyntaxNode>, RewriteError> {
        let rewritten = match &outcome.params {
            ExtractedParameters::Programmatic(plan) if outcome.is_linear() => self.apply_linear(node, plan)?,
            ExtractedParameters::Attributes(plan) if outcome.is_linear() => self.apply_attributes(node, plan, edits)?,
            _ => {
                if self.has_marker(node) {
                    return Ok(Arc::clone(node));
                }
                let marker = DiagnosticMarker::from_outcome(category, outcome).build(&self.builder);
                edits.require(&self.marker_fqn);
                return insert_annotation(node, marker, Placement::Leading);
            }
        };
        edits.require(TRANSACTIONAL);
        edits.schedule_removed(node, &rewritten);
        Ok(rewritten)
    }

    /// Whether the declaration already carries a review marker.
    pub fn has_marker(&self, node: &SyntaxNode) -> bool {
        let Some(modifiers) = node.child_of_kind("modifiers") else {
            return false;
        };
        modifiers
            .named_children()
            .filter(|c| matches!(c.kind(), "annotation" | "marker_annotation"))
            .filter_map(|a| a.child_by_field("name"))
            .map(|name| compact_text(name))
            .any(|name| name == self.builder.marker_name() || name == self.marker_fqn)
    }

    fn apply_linear(&self, method: &Arc<SyntaxNode>, plan: &LinearPlan) -> Result<Arc<SyntaxNode>, RewriteError> {
        let body = method
            .child(plan.body_index)
            .ok_or_else(|| RewriteError::missing(method.kind(), "body"))?;
        let try_node = body
            .child(plan.try_index)
            .filter(|t| t.kind() == "try_statement")
            .ok_or_else(|| RewriteError::InvalidPath { path: plan.try_path() })?;
        let block_index = try_node
            .child_index_by_field("body")
            .ok_or_else(|| RewriteError::missing("try_statement", "body"))?;
        let spliced = if plan.keep_try {
            debug!(handlers = plan.handlers.len(), "keeping translating handlers");
            vec![Arc::new(strip_recovery(try_node, block_index, plan)?)]
        } else {
            unwrap_guarded(try_node, block_index, plan)
        };

        let mut children: Vec<Arc<SyntaxNode>> = body.children()[..plan.try_index].to_vec();
        children.extend(spliced);
        children.extend(body.children()[plan.try_index + 1..].iter().cloned());
        let unwrapped = body.with_children(children);
        let body = Arc::new(remove_children(&unwrapped, &plan.prelude));

        let mut method_children = method.children().to_vec();
        method_children[plan.body_index] = body;
        let method = Arc::new(method.with_children(method_children));

        let mut pairs = Vec::new();
        if let Some(seconds) = plan.timeout_seconds {
            pairs.push(("timeout".to_string(), TreeBuilder::integer(seconds)));
        }
        match plan.rollback_for.as_slice() {
            [] => {}
            [single] => pairs.push(("rollbackFor".to_string(), TreeBuilder::class_literal(single))),
            many => pairs.push((
                "rollbackFor".to_string(),
                TreeBuilder::element_value_array(many.iter().map(|t| TreeBuilder::class_literal(t)).collect()),
            )),
        }
        insert_annotation(&method, TreeBuilder::annotation("Transactional", pairs), Placement::AfterAnnotations)
    }

    fn apply_attributes(
        &self,
        node: &Arc<SyntaxNode>,
        plan: &AttributePlan,
        edits: &mut ImportEdits,
    ) -> Result<Arc<SyntaxNode>, RewriteError> {
        let modifiers_index = node
            .child_index_of_kind("modifiers")
            .ok_or_else(|| RewriteError::missing(node.kind(), "modifiers"))?;
        let modifiers = &node.children()[modifiers_index];
        let (&first, rest) = plan
            .annotations
            .split_first()
            .ok_or_else(|| RewriteError::unsupported("no attributes to replace"))?;
        let replaced = modifiers
            .child(first)
            .ok_or_else(|| RewriteError::InvalidPath { path: vec![modifiers_index, first] })?;

        let mut pairs = Vec::new();
        if let Some(propagation) = &plan.propagation {
            pairs.push(("propagation".to_string(), TreeBuilder::field_access("Propagation", propagation)));
            edits.require(PROPAGATION);
        }
        match &plan.timeout {
            Some(DurationValue::Literal(seconds)) => pairs.push(("timeout".to_string(), TreeBuilder::integer(*seconds))),
            Some(DurationValue::Expression(expression)) => pairs.push(("timeout".to_string(), Arc::clone(expression))),
            None => {}
        }
        let annotation = TreeBuilder::annotation("Transactional", pairs).with_leading_prefix(replaced.leading_prefix());

        let mut children = modifiers.children().to_vec();
        children[first] = Arc::new(annotation);
        let modifiers = remove_children(&modifiers.with_children(children), rest);

        let mut node_children = node.children().to_vec();
        node_children[modifiers_index] = Arc::new(modifiers);
        Ok(Arc::new(node.with_children(node_children)))
    }
}

/// Add an annotation to a declaration, creating its modifiers when missing.
///
/// The annotation inherits the declaration's leading whitespace when it
/// becomes the first token; otherwise it follows the separator style (same
/// line or own line) of the annotations already there.
fn insert_annotation(
    node: &Arc<SyntaxNode>,
    annotation: Arc<SyntaxNode>,
    placement: Placement,
) -> Result<Arc<SyntaxNode>, RewriteError> {
    let declaration_prefix = node.leading_prefix().to_string();
    let own_line = format!("\n{}", indentation_of(&declaration_prefix));

    let Some(modifiers_index) = node.child_index_of_kind("modifiers") else {
        let first = node
            .children()
            .first()
            .ok_or_else(|| RewriteError::missing(node.kind(), "children"))?;
        let mut children = node.children().to_vec();
        children[0] = Arc::new(first.with_leading_prefix(&own_line));
        let modifiers = TreeBuilder::modifiers(vec![Arc::new(annotation.with_leading_prefix(&declaration_prefix))]);
        children.insert(0, modifiers);
        return Ok(Arc::new(node.with_children(children)));
    };

    let modifiers = &node.children()[modifiers_index];
    let last_annotation = modifiers
        .children()
        .iter()
        .rposition(|c| matches!(c.kind(), "annotation" | "marker_annotation"));

    let modifiers = match (placement, last_annotation) {
        (Placement::AfterAnnotations, Some(last)) => {
            let following = modifiers
                .child(last + 1)
                .map(|c| c.leading_prefix().to_string())
                .or_else(|| node.child(modifiers_index + 1).map(|c| c.leading_prefix().to_string()))
                .unwrap_or_default();
            let separator = if following.contains('\n') { own_line.as_str() } else { " " };
            insert_child(modifiers, last + 1, Arc::new(annotation.with_leading_prefix(separator)))
        }
        _ => {
            let mut children = modifiers.children().to_vec();
            if let Some(first) = children.first_mut() {
                *first = Arc::new(first.with_leading_prefix(&own_line));
            }
            children.insert(0, Arc::new(annotation.with_leading_prefix(&declaration_prefix)));
            modifiers.with_children(children)
        }
    };

    let mut children = node.children().to_vec();
    children[modifiers_index] = Arc::new(modifiers);
    Ok(Arc::new(node.with_children(children)))
}

/// The statements left in the guarded block, reindented to replace the try.
fn unwrap_guarded(try_node: &SyntaxNode, block_index: usize, plan: &LinearPlan) -> Vec<Arc<SyntaxNode>> {
    let block = &try_node.children()[block_index];
    let inner_indent = block
        .named_children()
        .next()
        .map(|s| indentation_of(s.leading_prefix()).to_string())
        .unwrap_or_default();
    let try_prefix = try_node.leading_prefix().to_string();
    let outer_indent = indentation_of(&try_prefix).to_string();

    let kept = remove_children(block, &plan.managed);
    let inner = kept
        .children()
        .get(1..kept.children().len().saturating_sub(1))
        .unwrap_or_default();
    let mut spliced: Vec<Arc<SyntaxNode>> = inner
        .iter()
        .map(|child| Arc::new(child.map_prefixes(&|p: &str| reindent(p, &inner_indent, &outer_indent))))
        .collect();
    if let Some(first) = spliced.first_mut() {
        *first = Arc::new(first.with_leading_prefix(&try_prefix));
    }
    debug!(statements = spliced.len(), "unwrapping guarded block");
    spliced
}

/// The try itself, minus the managed statements and each handler's recovery.
fn strip_recovery(try_node: &SyntaxNode, block_index: usize, plan: &LinearPlan) -> Result<SyntaxNode, RewriteError> {
    let mut children = try_node.children().to_vec();
    children[block_index] = Arc::new(remove_children(&children[block_index], &plan.managed));
    for &(clause_index, recovery) in &plan.handlers {
        let clause = children
            .get(clause_index)
            .filter(|c| c.kind() == "catch_clause")
            .cloned()
            .ok_or_else(|| {
                let mut path = plan.try_path();
                path.push(clause_index);
                RewriteError::InvalidPath { path }
            })?;
        let body_index = clause
            .child_index_by_field("body")
            .ok_or_else(|| RewriteError::missing("catch_clause", "body"))?;
        let mut clause_children = clause.children().to_vec();
        clause_children[body_index] = Arc::new(remove_children(&clause_children[body_index], &[recovery]));
        children[clause_index] = Arc::new(clause.with_children(clause_children));
    }
    Ok(try_node.with_children(children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{node_at, ToSource};
    use crate::classifier::{Category, Rule};
    use crate::parser::{JavaParser, Parser};
    use pretty_assertions::assert_eq;

    fn method_of(source: &str) -> (Arc<SyntaxNode>, Vec<usize>) {
        let mut parser = JavaParser::new().unwrap();
        let tree = parser.parse(source).unwrap();
        let mut path = vec![];
        let class = tree.named_children().position(|c| c.kind() == "class_declaration").unwrap();
        let class_index = tree.named_child_indices()[class];
        path.push(class_index);
        let class_node = &tree.children()[class_index];
        let body_index = class_node.child_index_by_field("body").unwrap();
        path.push(body_index);
        let body = &class_node.children()[body_index];
        let method_index = body.children().iter().position(|c| c.kind() == "method_declaration").unwrap();
        path.push(method_index);
        (tree, path)
    }

    fn complex(node: &Arc<SyntaxNode>) -> ClassificationOutcome {
        ClassificationOutcome::complex(node, Rule::RepeatedInLoop, "repeated use inside a loop", vec![])
    }

    #[test]
    fn marker_takes_the_declaration_position() {
        let source = "class A {\n    @Override\n    public void run() {\n        go();\n    }\n}\n";
        let (tree, path) = method_of(source);
        let method = node_at(&tree, &path).unwrap().clone();
        let engine = RewriteEngine::default();
        let mut edits = ImportEdits::default();

        let marked = engine
            .rewrite(&method, &complex(&method), "programmatic-transactions", &mut edits)
            .unwrap();
        let text = marked.to_source();
        assert!(text.starts_with("\n    @ManualReview(category = \"programmatic-transactions\""), "{text}");
        assert!(text.contains(")\n    @Override\n    public void run()"), "{text}");
        assert!(edits.add.contains(DEFAULT_MARKER));

        // a second pass leaves the marked declaration alone
        let again = engine
            .rewrite(&marked, &complex(&marked), "programmatic-transactions", &mut edits)
            .unwrap();
        assert_eq!(again.to_source(), text);
    }

    #[test]
    fn marker_creates_missing_modifiers() {
        let source = "class A {\n    void run() { }\n}\n";
        let (tree, path) = method_of(source);
        let method = node_at(&tree, &path).unwrap().clone();
        let engine = RewriteEngine::new("com.acme.Review");
        let marked = engine
            .rewrite(&method, &complex(&method), "x", &mut ImportEdits::default())
            .unwrap();
        assert!(marked.to_source().starts_with("\n    @Review(category = \"x\""));
        assert!(marked.to_source().ends_with(")\n    void run() { }"));
        assert!(engine.has_marker(&marked));
    }

    #[test]
    fn annotation_follows_same_line_style() {
        let source = "class A {\n    @Override public void run() { }\n}\n";
        let (tree, path) = method_of(source);
        let method = node_at(&tree, &path).unwrap().clone();
        let annotated = insert_annotation(
            &method,
            TreeBuilder::annotation("Transactional", vec![]),
            Placement::AfterAnnotations,
        )
        .unwrap();
        assert_eq!(annotated.to_source(), "\n    @Override @Transactional public void run() { }");
    }

    #[test]
    fn linear_outcomes_unwrap_the_guarded_block() {
        let source = "class A {\n    public void run() throws Exception {\n        try {\n            utx.begin();\n            save();\n            utx.commit();\n        } catch (Exception e) {\n            utx.rollback();\n            throw e;\n        }\n    }\n}\n";
        let (tree, path) = method_of(source);
        let method = node_at(&tree, &path).unwrap().clone();
        let body_index = method.child_index_by_field("body").unwrap();
        let body = &method.children()[body_index];
        let try_index = body.children().iter().position(|c| c.kind() == "try_statement").unwrap();
        let block = &body.children()[try_index].children()[1];
        let statements = block.named_child_indices();
        let plan = LinearPlan {
            symbol: crate::symbols::Symbol::field("A", "utx"),
            ty: crate::symbols::TrackedType::UserTransaction,
            timeout_seconds: Some(30),
            rollback_for: vec!["Exception".to_string()],
            body_index,
            prelude: vec![],
            try_index,
            managed: vec![statements[0], statements[2]],
            handlers: vec![],
            keep_try: false,
            removed_sites: 3,
        };
        let outcome = ClassificationOutcome::linear(
            &method,
            Rule::LinearDemarcation,
            plan.try_path(),
            ExtractedParameters::Programmatic(plan),
        );
        assert_eq!(outcome.category, Category::Linear);
        let mut edits = ImportEdits::default();
        let rewritten = RewriteEngine::default().rewrite(&method, &outcome, "p", &mut edits).unwrap();
        assert_eq!(
            rewritten.to_source(),
            "\n    @Transactional(timeout = 30, rollbackFor = Exception.class)\n    public void run() throws Exception {\n        save();\n    }"
        );
        assert!(edits.add.contains(TRANSACTIONAL));
    }

    #[test]
    fn translating_handlers_keep_the_try_without_the_rollback() {
        let source = "class A {\n    public void run() {\n        try {\n            utx.begin();\n            save();\n            utx.commit();\n        } catch (Exception e) {\n            utx.rollback();\n            throw new IllegalStateException(e);\n        }\n    }\n}\n";
        let (tree, path) = method_of(source);
        let method = node_at(&tree, &path).unwrap().clone();
        let body_index = method.child_index_by_field("body").unwrap();
        let body = &method.children()[body_index];
        let try_index = body.children().iter().position(|c| c.kind() == "try_statement").unwrap();
        let try_node = &body.children()[try_index];
        let statements = try_node.children()[1].named_child_indices();
        let catch_index = try_node.children().iter().position(|c| c.kind() == "catch_clause").unwrap();
        let catch_body = try_node.children()[catch_index].child_by_field("body").unwrap();
        let plan = LinearPlan {
            symbol: crate::symbols::Symbol::field("A", "utx"),
            ty: crate::symbols::TrackedType::UserTransaction,
            timeout_seconds: None,
            rollback_for: vec!["IllegalStateException".to_string()],
            body_index,
            prelude: vec![],
            try_index,
            managed: vec![statements[0], statements[2]],
            handlers: vec![(catch_index, catch_body.named_child_indices()[0])],
            keep_try: true,
            removed_sites: 3,
        };
        let outcome = ClassificationOutcome::linear(
            &method,
            Rule::LinearDemarcation,
            plan.try_path(),
            ExtractedParameters::Programmatic(plan),
        );
        let rewritten = RewriteEngine::default()
            .rewrite(&method, &outcome, "p", &mut ImportEdits::default())
            .unwrap();
        assert_eq!(
            rewritten.to_source(),
            "\n    @Transactional(rollbackFor = IllegalStateException.class)\n    public void run() {\n        try {\n            save();\n        } catch (Exception e) {\n            throw new IllegalStateException(e);\n        }\n    }"
        );
    }
}
