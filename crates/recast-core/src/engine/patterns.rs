/*!
# Node Pattern Matching

Small combinators for locating declarations in a syntax tree. Recipes use
them to find the nodes they hand to the classifier.
*/

use std::sync::Arc;

use crate::ast::{NodePath, SyntaxNode};
use crate::facts::annotation_names;

/// Pattern matcher for syntax nodes
pub trait NodePattern {
    /// Check if this pattern matches the given node
    fn matches(&self, node: &SyntaxNode) -> bool;
}

/// Pattern matcher utility
pub struct PatternMatcher;

impl PatternMatcher {
    /// Match nodes of one grammar kind
    pub fn kind(kind: &'static str) -> KindMatcher {
        KindMatcher { kinds: vec![kind] }
    }

    /// Match nodes of any of the given grammar kinds
    pub fn kind_in(kinds: &[&'static str]) -> KindMatcher {
        KindMatcher { kinds: kinds.to_vec() }
    }

    /// Match declarations carrying an annotation with one of the simple names
    pub fn annotated_with(names: &[&str]) -> AnnotatedMatcher {
        AnnotatedMatcher {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    /// Combine patterns with AND logic
    pub fn all<P1: NodePattern, P2: NodePattern>(p1: P1, p2: P2) -> AndPattern<P1, P2> {
        AndPattern { p1, p2 }
    }
}

pub struct KindMatcher {
    kinds: Vec<&'static str>,
}

impl NodePattern for KindMatcher {
    fn matches(&self, node: &SyntaxNode) -> bool {
        self.kinds.contains(&node.kind())
    }
}

pub struct AnnotatedMatcher {
    names: Vec<String>,
}

impl NodePattern for AnnotatedMatcher {
    fn matches(&self, node: &SyntaxNode) -> bool {
        node.child_of_kind("modifiers")
            .map(|m| annotation_names(m).iter().any(|a| self.names.contains(a)))
            .unwrap_or(false)
    }
}

/// AND pattern combinator
pub struct AndPattern<P1: NodePattern, P2: NodePattern> {
    p1: P1,
    p2: P2,
}

impl<P1: NodePattern, P2: NodePattern> NodePattern for AndPattern<P1, P2> {
    fn matches(&self, node: &SyntaxNode) -> bool {
        self.p1.matches(node) && self.p2.matches(node)
    }
}

/// Deep traversal returning the paths of matching nodes
pub struct NodeWalker;

impl NodeWalker {
    /// Paths of every node matching `pattern`, in document order
    pub fn find_paths<P: NodePattern>(root: &Arc<SyntaxNode>, pattern: &P) -> Vec<NodePath> {
        let mut found = Vec::new();
        let mut path = Vec::new();
        Self::find_paths_recursive(root, pattern, &mut path, &mut found);
        found
    }

    /// Path of the first node matching `pattern`
    pub fn find_first<P: NodePattern>(root: &Arc<SyntaxNode>, pattern: &P) -> Option<NodePath> {
        let mut path = Vec::new();
        Self::find_first_recursive(root, pattern, &mut path)
    }

    fn find_paths_recursive<P: NodePattern>(
        node: &SyntaxNode,
        pattern: &P,
        path: &mut Vec<usize>,
        found: &mut Vec<NodePath>,
    ) {
        if pattern.matches(node) {
            found.push(path.clone());
        }
        for (index, child) in node.children().iter().enumerate() {
            if child.is_leaf() {
                continue;
            }
            path.push(index);
            Self::find_paths_recursive(child, pattern, path, found);
            path.pop();
        }
    }

    fn find_first_recursive<P: NodePattern>(node: &SyntaxNode, pattern: &P, path: &mut Vec<usize>) -> Option<NodePath> {
        if pattern.matches(node) {
            return Some(path.clone());
        }
        for (index, child) in node.children().iter().enumerate() {
            if child.is_leaf() {
                continue;
            }
            path.push(index);
            if let Some(found) = Self::find_first_recursive(child, pattern, path) {
                return Some(found);
            }
            path.pop();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::node_at;
    use crate::parser::{JavaParser, Parser};

    const SOURCE: &str = "@Stateless\npublic class Orders {\n    @TransactionAttribute(TransactionAttributeType.REQUIRES_NEW)\n    public void place() { }\n\n    public void list() { }\n}\n";

    #[test]
    fn finds_annotated_methods() {
        let tree = JavaParser::new().unwrap().parse(SOURCE).unwrap();
        let pattern = PatternMatcher::all(
            PatternMatcher::kind("method_declaration"),
            PatternMatcher::annotated_with(&["TransactionAttribute"]),
        );
        let paths = NodeWalker::find_paths(&tree, &pattern);
        assert_eq!(paths.len(), 1);
        let method = node_at(&tree, &paths[0]).unwrap();
        assert_eq!(method.child_by_field("name").unwrap().text(), "place");
    }

    #[test]
    fn first_match_is_in_document_order() {
        let tree = JavaParser::new().unwrap().parse(SOURCE).unwrap();
        let declarations = PatternMatcher::kind_in(&["method_declaration", "constructor_declaration"]);
        let path = NodeWalker::find_first(&tree, &declarations).unwrap();
        let method = node_at(&tree, &path).unwrap();
        assert_eq!(method.child_by_field("name").unwrap().text(), "place");

        let bean = PatternMatcher::all(
            PatternMatcher::kind("class_declaration"),
            PatternMatcher::annotated_with(&["Stateless"]),
        );
        assert_eq!(NodeWalker::find_paths(&tree, &bean).len(), 1);
        assert!(NodeWalker::find_first(&tree, &PatternMatcher::annotated_with(&["Singleton"])).is_none());
    }
}
