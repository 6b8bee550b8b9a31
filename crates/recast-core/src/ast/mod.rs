//! Lossless syntax tree shared by every pipeline phase.
//!
//! Nodes are immutable and reference-counted. An edit never mutates a node in
//! place: it rebuilds the spine from the edited node up to the root and shares
//! every untouched subtree with the previous version. Leaves own their token
//! text together with the whitespace (and comments the grammar hides) that
//! precedes them, so printing a parsed tree reproduces its input byte for byte.

use std::sync::Arc;

use serde::Serialize;

use crate::errors::RewriteError;

pub mod builder;
pub mod source_gen;

pub use builder::TreeBuilder;
pub use source_gen::ToSource;

/// Child indices leading from a root to one of its descendants.
pub type NodePath = Vec<usize>;

/// Coarse node classification used by the scan and rewrite phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeCategory {
    Declaration,
    Call,
    Conditional,
    Loop,
    Block,
    Try,
    Handler,
    Lambda,
    Literal,
    Reference,
    Annotation,
    Statement,
    Token,
    Other,
}

/// Text carried by a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub prefix: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    kind: &'static str,
    field: Option<&'static str>,
    named: bool,
    token: Option<Token>,
    children: Vec<Arc<SyntaxNode>>,
}

impl SyntaxNode {
    /// Create a leaf carrying `text` preceded by `prefix`.
    pub fn leaf(kind: &'static str, named: bool, prefix: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            field: None,
            named,
            token: Some(Token {
                prefix: prefix.into(),
                text: text.into(),
            }),
            children: Vec::new(),
        }
    }

    /// Create a named interior node.
    pub fn branch(kind: &'static str, children: Vec<Arc<SyntaxNode>>) -> Self {
        Self {
            kind,
            field: None,
            named: true,
            token: None,
            children,
        }
    }

    pub fn with_field(mut self, field: Option<&'static str>) -> Self {
        self.field = field;
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Grammar field this node occupies in its parent, if any.
    pub fn field(&self) -> Option<&'static str> {
        self.field
    }

    pub fn is_named(&self) -> bool {
        self.named
    }

    pub fn is_leaf(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    /// Token text of a leaf; empty for interior nodes.
    pub fn text(&self) -> &str {
        self.token.as_ref().map(|t| t.text.as_str()).unwrap_or("")
    }

    pub fn children(&self) -> &[Arc<SyntaxNode>] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&Arc<SyntaxNode>> {
        self.children.get(index)
    }

    /// Named children, skipping punctuation, keywords and comments.
    pub fn named_children(&self) -> impl Iterator<Item = &Arc<SyntaxNode>> {
        self.children.iter().filter(|c| c.named && !c.is_comment())
    }

    /// Indices of the named, non-comment children.
    pub fn named_child_indices(&self) -> Vec<usize> {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.named && !c.is_comment())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn child_by_field(&self, field: &str) -> Option<&Arc<SyntaxNode>> {
        self.children.iter().find(|c| c.field == Some(field))
    }

    pub fn child_index_by_field(&self, field: &str) -> Option<usize> {
        self.children.iter().position(|c| c.field == Some(field))
    }

    pub fn children_by_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Arc<SyntaxNode>> + 'a {
        self.children.iter().filter(move |c| c.field == Some(field))
    }

    pub fn child_of_kind(&self, kind: &str) -> Option<&Arc<SyntaxNode>> {
        self.children.iter().find(|c| c.kind == kind)
    }

    pub fn child_index_of_kind(&self, kind: &str) -> Option<usize> {
        self.children.iter().position(|c| c.kind == kind)
    }

    /// True when any unnamed token child has the given text (keywords, operators).
    pub fn has_token(&self, text: &str) -> bool {
        self.children.iter().any(|c| !c.named && c.text() == text)
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.kind, "line_comment" | "block_comment")
    }

    /// Copy of this node with a new child list.
    pub fn with_children(&self, children: Vec<Arc<SyntaxNode>>) -> Self {
        Self {
            kind: self.kind,
            field: self.field,
            named: self.named,
            token: self.token.clone(),
            children,
        }
    }

    pub fn category(&self) -> NodeCategory {
        if !self.named {
            return NodeCategory::Token;
        }
        match self.kind {
            "class_declaration" | "interface_declaration" | "enum_declaration" | "record_declaration"
            | "annotation_type_declaration" | "method_declaration" | "constructor_declaration"
            | "field_declaration" | "local_variable_declaration" | "formal_parameter"
            | "import_declaration" | "package_declaration" => NodeCategory::Declaration,
            "method_invocation" | "object_creation_expression" | "explicit_constructor_invocation" => {
                NodeCategory::Call
            }
            "if_statement" | "ternary_expression" | "switch_expression" => NodeCategory::Conditional,
            "for_statement" | "enhanced_for_statement" | "while_statement" | "do_statement" => NodeCategory::Loop,
            "block" | "class_body" | "constructor_body" | "interface_body" | "enum_body" | "program" => {
                NodeCategory::Block
            }
            "try_statement" | "try_with_resources_statement" => NodeCategory::Try,
            "catch_clause" | "finally_clause" => NodeCategory::Handler,
            "lambda_expression" => NodeCategory::Lambda,
            "annotation" | "marker_annotation" => NodeCategory::Annotation,
            "identifier" | "field_access" | "scoped_identifier" | "type_identifier" | "this" | "super" => {
                NodeCategory::Reference
            }
            "expression_statement" | "return_statement" | "throw_statement" | "break_statement"
            | "continue_statement" | "yield_statement" | "labeled_statement" | "synchronized_statement"
            | "assert_statement" | "switch_statement" => NodeCategory::Statement,
            kind if kind.ends_with("_literal") || matches!(kind, "true" | "false" | "null_literal") => {
                NodeCategory::Literal
            }
            _ => NodeCategory::Other,
        }
    }

    /// First leaf in document order.
    pub fn first_leaf(&self) -> Option<&SyntaxNode> {
        if self.is_leaf() {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.first_leaf())
    }

    /// Whitespace preceding the first token of this node.
    pub fn leading_prefix(&self) -> &str {
        self.first_leaf()
            .and_then(|leaf| leaf.token.as_ref())
            .map(|t| t.prefix.as_str())
            .unwrap_or("")
    }

    /// Copy of this node whose first token is preceded by `prefix`.
    pub fn with_leading_prefix(&self, prefix: &str) -> SyntaxNode {
        if let Some(token) = &self.token {
            let mut leaf = self.clone();
            leaf.token = Some(Token {
                prefix: prefix.to_string(),
                text: token.text.clone(),
            });
            return leaf;
        }
        let mut children = self.children.clone();
        if let Some(pos) = children.iter().position(|c| c.first_leaf().is_some()) {
            children[pos] = Arc::new(children[pos].with_leading_prefix(prefix));
        }
        self.with_children(children)
    }

    /// Copy of this node with every token prefix passed through `f`.
    pub fn map_prefixes(&self, f: &dyn Fn(&str) -> String) -> SyntaxNode {
        if let Some(token) = &self.token {
            let mut leaf = self.clone();
            leaf.token = Some(Token {
                prefix: f(&token.prefix),
                text: token.text.clone(),
            });
            return leaf;
        }
        let children = self.children.iter().map(|c| Arc::new(c.map_prefixes(f))).collect();
        self.with_children(children)
    }

    /// Depth-first pre-order visit of this node and its descendants.
    pub fn visit(&self, f: &mut dyn FnMut(&SyntaxNode)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    /// Leaf texts of every identifier-like token below this node.
    pub fn identifier_texts(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_identifiers(self, &mut out);
        out
    }
}

fn collect_identifiers<'a>(node: &'a SyntaxNode, out: &mut Vec<&'a str>) {
    if node.is_leaf() && matches!(node.kind, "identifier" | "type_identifier") {
        out.push(node.text());
    }
    for child in &node.children {
        collect_identifiers(child, out);
    }
}

/// Resolve `path` below `root`.
pub fn node_at<'a>(root: &'a Arc<SyntaxNode>, path: &[usize]) -> Option<&'a Arc<SyntaxNode>> {
    let mut current = root;
    for &index in path {
        current = current.children.get(index)?;
    }
    Some(current)
}

/// Replace the node at `path`, sharing every subtree off the edited spine.
///
/// The replacement inherits the grammar field of the slot it lands in.
pub fn replace_at(
    root: &Arc<SyntaxNode>,
    path: &[usize],
    replacement: Arc<SyntaxNode>,
) -> Result<Arc<SyntaxNode>, RewriteError> {
    let Some((&first, rest)) = path.split_first() else {
        if replacement.field == root.field {
            return Ok(replacement);
        }
        let mut node = (*replacement).clone();
        node.field = root.field;
        return Ok(Arc::new(node));
    };
    let child = root
        .children
        .get(first)
        .ok_or_else(|| RewriteError::InvalidPath { path: path.to_vec() })?;
    let new_child = replace_at(child, rest, replacement)?;
    let mut children = root.children.clone();
    children[first] = new_child;
    Ok(Arc::new(root.with_children(children)))
}

/// Count of line breaks in a token prefix.
pub fn newline_count(prefix: &str) -> usize {
    prefix.matches('\n').count()
}

/// Remove the children at `indices`, keeping the layout of what survives.
///
/// The first named child after a removed run takes over the removed run's
/// leading whitespace when the run opened its parent; otherwise it keeps its
/// own indentation but never loses a blank line that preceded the run.
pub fn remove_children(node: &SyntaxNode, indices: &[usize]) -> SyntaxNode {
    let mut kept: Vec<Arc<SyntaxNode>> = Vec::with_capacity(node.children.len());
    let mut pending: Option<(String, bool)> = None;
    let mut seen_named = false;

    for (i, child) in node.children.iter().enumerate() {
        if indices.contains(&i) {
            if pending.is_none() {
                pending = Some((child.leading_prefix().to_string(), !seen_named));
            }
            continue;
        }
        let mut child = child.clone();
        if child.named {
            if let Some((removed_prefix, opened_parent)) = pending.take() {
                let own = child.leading_prefix().to_string();
                let prefix = if opened_parent {
                    removed_prefix
                } else if newline_count(&removed_prefix) > newline_count(&own) {
                    let indent = source_gen::indentation_of(&own);
                    format!("{}{}", "\n".repeat(newline_count(&removed_prefix)), indent)
                } else {
                    own
                };
                child = Arc::new(child.with_leading_prefix(&prefix));
            }
            seen_named = true;
        }
        kept.push(child);
    }
    node.with_children(kept)
}

/// Insert `child` at `index` of `node`'s child list.
pub fn insert_child(node: &SyntaxNode, index: usize, child: Arc<SyntaxNode>) -> SyntaxNode {
    let mut children = node.children.clone();
    let index = index.min(children.len());
    children.insert(index, child);
    node.with_children(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Arc<SyntaxNode> {
        let a = Arc::new(SyntaxNode::leaf("identifier", true, "", "a"));
        let b = Arc::new(SyntaxNode::leaf("identifier", true, "\n    ", "b"));
        let c = Arc::new(SyntaxNode::leaf("identifier", true, "\n\n    ", "c"));
        Arc::new(SyntaxNode::branch("block", vec![a, b, c]))
    }

    #[test]
    fn replace_shares_untouched_children() {
        let root = sample();
        let replacement = Arc::new(SyntaxNode::leaf("identifier", true, "\n    ", "z"));
        let edited = replace_at(&root, &[1], replacement).unwrap();

        assert_eq!(edited.to_source(), "a\n    z\n\n    c");
        assert!(Arc::ptr_eq(&root.children()[0], &edited.children()[0]));
        assert_eq!(root.to_source(), "a\n    b\n\n    c");
    }

    #[test]
    fn replace_rejects_missing_path() {
        let root = sample();
        let replacement = Arc::new(SyntaxNode::leaf("identifier", true, "", "z"));
        assert!(replace_at(&root, &[7, 0], replacement).is_err());
    }

    #[test]
    fn removal_keeps_blank_line_before_following_child() {
        let root = sample();
        let edited = remove_children(&root, &[1]);
        assert_eq!(edited.to_source(), "a\n\n    c");
    }

    #[test]
    fn removal_of_leading_child_hands_over_its_prefix() {
        let root = sample();
        let edited = remove_children(&root, &[0]);
        assert_eq!(edited.to_source(), "b\n\n    c");
    }

    #[test]
    fn categories_follow_kinds() {
        let node = SyntaxNode::branch("enhanced_for_statement", Vec::new());
        assert_eq!(node.category(), NodeCategory::Loop);
        let token = SyntaxNode::leaf("{", false, "", "{");
        assert_eq!(token.category(), NodeCategory::Token);
        let literal = SyntaxNode::leaf("decimal_integer_literal", true, "", "1");
        assert_eq!(literal.category(), NodeCategory::Literal);
    }
}
