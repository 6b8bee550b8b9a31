use std::sync::Arc;

use crate::ast::{SyntaxNode, ToSource};
use crate::parser::{ParseError, Parser};

/// Java parser backed by tree-sitter-java.
///
/// The concrete syntax tree is converted into [`SyntaxNode`]s one leaf at a
/// time; the bytes between two leaves become the prefix of the second one and
/// trailing bytes land on a synthetic `eof` leaf.
pub struct JavaParser {
    parser: tree_sitter::Parser,
}

impl JavaParser {
    pub fn new() -> Result<Self, ParseError> {
        let mut parser = tree_sitter::Parser::new();
        let language: tree_sitter::Language = tree_sitter_java::LANGUAGE.into();
        parser.set_language(&language).map_err(|e| ParseError::Language {
            language: "java".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { parser })
    }

    fn convert(source: &str, tree: &tree_sitter::Tree) -> SyntaxNode {
        let root = tree.root_node();
        let mut cursor = tree.walk();
        let mut last_end = 0usize;
        let mut children = Vec::new();

        if cursor.goto_first_child() {
            loop {
                children.push(Arc::new(Self::convert_node(&mut cursor, source, &mut last_end)));
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
        }

        let trailing = source.get(last_end..).unwrap_or_default();
        children.push(Arc::new(SyntaxNode::leaf("eof", false, trailing, "")));
        SyntaxNode::branch(root.kind(), children)
    }

    fn convert_node(cursor: &mut tree_sitter::TreeCursor, source: &str, last_end: &mut usize) -> SyntaxNode {
        let node = cursor.node();
        let field = cursor.field_name();

        if node.child_count() == 0 {
            let start = node.start_byte().max(*last_end);
            let end = node.end_byte().max(start);
            let prefix = source.get(*last_end..start).unwrap_or_default();
            let text = source.get(start..end).unwrap_or_default();
            *last_end = end;
            return SyntaxNode::leaf(node.kind(), node.is_named(), prefix, text).with_field(field);
        }

        let mut children = Vec::with_capacity(node.child_count());
        if cursor.goto_first_child() {
            loop {
                children.push(Arc::new(Self::convert_node(cursor, source, last_end)));
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
            cursor.goto_parent();
        }

        SyntaxNode::branch(node.kind(), children).with_field(field)
    }

    fn first_error(root: tree_sitter::Node, source: &str) -> ParseError {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.is_error() || node.is_missing() {
                let position = node.start_position();
                let snippet = source
                    .lines()
                    .nth(position.row)
                    .map(|line| line.trim().chars().take(80).collect())
                    .unwrap_or_default();
                return ParseError::Syntax {
                    line: position.row + 1,
                    column: position.column + 1,
                    snippet,
                };
            }
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).filter(|c| c.has_error()).collect();
            stack.extend(children.into_iter().rev());
        }
        ParseError::Syntax {
            line: root.start_position().row + 1,
            column: root.start_position().column + 1,
            snippet: String::new(),
        }
    }
}

impl Parser for JavaParser {
    fn parse(&mut self, source: &str) -> Result<Arc<SyntaxNode>, ParseError> {
        let tree = self.parser.parse(source, None).ok_or(ParseError::NoTree)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(Self::first_error(root, source));
        }

        let converted = Self::convert(source, &tree);
        if converted.to_source() != source {
            return Err(ParseError::Lossy);
        }
        Ok(Arc::new(converted))
    }

    fn name(&self) -> &'static str {
        "java"
    }
}
