//! Unit-level cleanup after every declaration of the unit was rewritten.
//!
//! Adds the imports the rewrites registered, drops imports the rewrites
//! orphaned and removes tracked fields whose every use across the run was
//! migrated away.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::ast::{insert_child, remove_children, SyntaxNode, TreeBuilder};
use crate::errors::RewriteError;
use crate::facts::index::is_type_declaration;
use crate::symbols::{compact_text, Symbol};

/// Import changes collected while rewriting one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportEdits {
    /// Fully qualified names that must be imported.
    pub add: BTreeSet<String>,
    /// Simple names that may no longer be referenced.
    pub candidates: BTreeSet<String>,
}

impl ImportEdits {
    pub fn require(&mut self, fqn: &str) {
        self.add.insert(fqn.to_string());
    }

    /// Schedule every name that `before` mentions and `after` no longer does.
    pub fn schedule_removed(&mut self, before: &SyntaxNode, after: &SyntaxNode) {
        let kept: BTreeSet<&str> = after.identifier_texts().into_iter().collect();
        for name in before.identifier_texts() {
            if !kept.contains(name) {
                self.candidates.insert(name.to_string());
            }
        }
    }
}

struct ImportLine {
    index: usize,
    name: String,
    is_static: bool,
    is_wildcard: bool,
}

/// Apply import edits and drop dead fields. `dead_fields` holds the field
/// symbols whose retained usage count across the run is zero.
pub fn cleanup(
    root: &Arc<SyntaxNode>,
    edits: &ImportEdits,
    dead_fields: &BTreeSet<Symbol>,
) -> Result<Arc<SyntaxNode>, RewriteError> {
    let mut candidates = edits.candidates.clone();
    let package = root
        .child_of_kind("package_declaration")
        .and_then(|p| p.named_children().find(|c| matches!(c.kind(), "identifier" | "scoped_identifier")))
        .map(|name| compact_text(name));

    let mut root = Arc::clone(root);
    if !dead_fields.is_empty() {
        root = remove_fields(&root, package.as_deref(), None, dead_fields, &mut candidates);
    }
    let root = remove_imports(&root, &candidates, &edits.add);
    add_imports(&root, &edits.add, package.as_deref())
}

fn remove_fields(
    node: &Arc<SyntaxNode>,
    package: Option<&str>,
    class: Option<&str>,
    dead: &BTreeSet<Symbol>,
    candidates: &mut BTreeSet<String>,
) -> Arc<SyntaxNode> {
    let fqn = match (is_type_declaration(node.kind()), node.child_by_field("name")) {
        (true, Some(name)) => Some(match (class, package) {
            (Some(outer), _) => format!("{outer}.{}", name.text()),
            (None, Some(package)) => format!("{package}.{}", name.text()),
            (None, None) => name.text().to_string(),
        }),
        _ => None,
    };
    let class = fqn.as_deref().or(class);

    let mut removed = Vec::new();
    let mut children = node.children().to_vec();
    for (index, child) in node.children().iter().enumerate() {
        if child.is_leaf() {
            continue;
        }
        if let (Some(owner), "field_declaration") = (class, child.kind()) {
            if is_dead_field(child, owner, dead) {
                debug!(owner, "removing migrated transaction field");
                for name in child.identifier_texts() {
                    candidates.insert(name.to_string());
                }
                removed.push(index);
                continue;
            }
        }
        // fields only live in type bodies
        if matches!(child.kind(), "method_declaration" | "constructor_declaration") {
            continue;
        }
        children[index] = remove_fields(child, package, class, dead, candidates);
    }

    let rebuilt = node.with_children(children);
    if removed.is_empty() {
        return Arc::new(rebuilt);
    }
    Arc::new(remove_children(&rebuilt, &removed))
}

fn is_dead_field(field: &SyntaxNode, owner: &str, dead: &BTreeSet<Symbol>) -> bool {
    let declarators: Vec<_> = field.children_by_field("declarator").collect();
    let [declarator] = declarators.as_slice() else {
        return false;
    };
    declarator
        .child_by_field("name")
        .map(|name| dead.contains(&Symbol::field(owner, name.text())))
        .unwrap_or(false)
}

fn import_lines(root: &SyntaxNode) -> Vec<ImportLine> {
    root.children()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind() == "import_declaration")
        .filter_map(|(index, import)| {
            let name = import
                .named_children()
                .find(|c| matches!(c.kind(), "identifier" | "scoped_identifier"))?;
            Some(ImportLine {
                index,
                name: compact_text(name),
                is_static: import.has_token("static"),
                is_wildcard: import.child_of_kind("asterisk").is_some(),
            })
        })
        .collect()
}

/// Identifiers used anywhere outside package and import declarations.
fn referenced_names(root: &SyntaxNode) -> BTreeSet<String> {
    root.children()
        .iter()
        .filter(|c| !matches!(c.kind(), "import_declaration" | "package_declaration"))
        .flat_map(|c| c.identifier_texts())
        .map(str::to_string)
        .collect()
}

fn simple_name(fqn: &str) -> &str {
    fqn.rsplit('.').next().unwrap_or(fqn)
}

fn remove_imports(root: &Arc<SyntaxNode>, candidates: &BTreeSet<String>, required: &BTreeSet<String>) -> Arc<SyntaxNode> {
    if candidates.is_empty() {
        return Arc::clone(root);
    }
    let referenced = referenced_names(root);
    let unused: Vec<usize> = import_lines(root)
        .into_iter()
        .filter(|line| !line.is_wildcard && !required.contains(&line.name))
        .filter(|line| {
            let simple = simple_name(&line.name);
            candidates.contains(simple) && !referenced.contains(simple)
        })
        .map(|line| line.index)
        .collect();
    if unused.is_empty() {
        return Arc::clone(root);
    }
    debug!(count = unused.len(), "removing unused imports");
    Arc::new(remove_children(root, &unused))
}

fn add_imports(
    root: &Arc<SyntaxNode>,
    required: &BTreeSet<String>,
    package: Option<&str>,
) -> Result<Arc<SyntaxNode>, RewriteError> {
    let mut root = Arc::clone(root);
    for fqn in required {
        let Some((owner, simple)) = fqn.rsplit_once('.') else {
            continue;
        };
        if package == Some(owner) || owner == "java.lang" {
            continue;
        }
        let lines = import_lines(&root);
        if lines
            .iter()
            .any(|l| !l.is_static && (l.name == *fqn || (l.is_wildcard && l.name == owner)))
        {
            continue;
        }
        if lines
            .iter()
            .any(|l| !l.is_static && !l.is_wildcard && simple_name(&l.name) == simple)
        {
            return Err(RewriteError::unsupported(format!(
                "{simple} is already imported from another package"
            )));
        }
        root = Arc::new(insert_import(&root, &lines, fqn));
    }
    Ok(root)
}

/// Insert `import fqn;` at its sorted position among the regular imports.
fn insert_import(root: &SyntaxNode, lines: &[ImportLine], fqn: &str) -> SyntaxNode {
    let import = TreeBuilder::import(fqn);
    let regular: Vec<&ImportLine> = lines.iter().filter(|l| !l.is_static).collect();

    if let Some(next) = regular.iter().find(|l| l.name.as_str() > fqn) {
        // takes over the position, and the blank lines, of the import it precedes
        let successor = &root.children()[next.index];
        let prefix = successor.leading_prefix().to_string();
        let mut children = root.children().to_vec();
        children[next.index] = Arc::new(successor.with_leading_prefix("\n"));
        children.insert(next.index, Arc::new(import.with_leading_prefix(&prefix)));
        return root.with_children(children);
    }
    if let Some(last) = regular.last().copied().or(lines.last()) {
        return insert_child(root, last.index + 1, Arc::new(import.with_leading_prefix("\n")));
    }

    match root.child_index_of_kind("package_declaration") {
        Some(package) => insert_child(root, package + 1, Arc::new(import.with_leading_prefix("\n\n"))),
        None => {
            let mut children = root.children().to_vec();
            if let Some(first) = children.first_mut() {
                if first.kind() != "eof" {
                    let own = first.leading_prefix().trim_start_matches('\n').to_string();
                    *first = Arc::new(first.with_leading_prefix(&format!("\n\n{own}")));
                }
            }
            children.insert(0, Arc::new(import.with_leading_prefix("")));
            root.with_children(children)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ToSource;
    use crate::parser::{JavaParser, Parser};
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Arc<SyntaxNode> {
        JavaParser::new().unwrap().parse(source).unwrap()
    }

    fn edits(add: &[&str], candidates: &[&str]) -> ImportEdits {
        ImportEdits {
            add: add.iter().map(|s| s.to_string()).collect(),
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn imports_are_added_in_sorted_position() {
        let root = parse("package com.acme;\n\nimport java.util.List;\nimport javax.transaction.UserTransaction;\n\nclass A { List<String> l; UserTransaction u; }\n");
        let cleaned = cleanup(
            &root,
            &edits(&["org.springframework.transaction.annotation.Transactional"], &[]),
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(
            cleaned.to_source(),
            "package com.acme;\n\nimport java.util.List;\nimport javax.transaction.UserTransaction;\nimport org.springframework.transaction.annotation.Transactional;\n\nclass A { List<String> l; UserTransaction u; }\n"
        );
    }

    #[test]
    fn first_import_keeps_the_blank_line() {
        let root = parse("package com.acme;\n\nimport javax.ejb.Stateless;\n\nclass A { }\n");
        let cleaned = cleanup(&root, &edits(&["com.zeta.Z", "com.acme.Local", "io.a.B"], &[]), &BTreeSet::new()).unwrap();
        assert_eq!(
            cleaned.to_source(),
            "package com.acme;\n\nimport com.zeta.Z;\nimport io.a.B;\nimport javax.ejb.Stateless;\n\nclass A { }\n"
        );
    }

    #[test]
    fn static_imports_stay_after_the_regular_block() {
        let root = parse("package com.acme;\n\nimport java.util.List;\n\nimport static java.util.Objects.requireNonNull;\n\nclass A { List<String> l; }\n");
        let cleaned = cleanup(&root, &edits(&["org.springframework.transaction.annotation.Transactional"], &[]), &BTreeSet::new()).unwrap();
        assert_eq!(
            cleaned.to_source(),
            "package com.acme;\n\nimport java.util.List;\nimport org.springframework.transaction.annotation.Transactional;\n\nimport static java.util.Objects.requireNonNull;\n\nclass A { List<String> l; }\n"
        );

        let root = parse("package com.acme;\n\nimport static java.util.Objects.requireNonNull;\n\nclass A { }\n");
        let cleaned = cleanup(&root, &edits(&["com.acme.support.Local"], &[]), &BTreeSet::new()).unwrap();
        assert_eq!(
            cleaned.to_source(),
            "package com.acme;\n\nimport static java.util.Objects.requireNonNull;\nimport com.acme.support.Local;\n\nclass A { }\n"
        );
    }

    #[test]
    fn unreferenced_candidates_are_removed() {
        let root = parse(
            "package com.acme;\n\nimport java.util.List;\nimport javax.transaction.UserTransaction;\nimport javax.transaction.Status;\n\nclass A { List<String> l; int s = Status.STATUS_ACTIVE; }\n",
        );
        let cleaned = cleanup(&root, &edits(&[], &["UserTransaction", "Status", "List"]), &BTreeSet::new()).unwrap();
        assert_eq!(
            cleaned.to_source(),
            "package com.acme;\n\nimport java.util.List;\nimport javax.transaction.Status;\n\nclass A { List<String> l; int s = Status.STATUS_ACTIVE; }\n"
        );
    }

    #[test]
    fn dead_fields_and_their_imports_go() {
        let root = parse(
            "package com.acme;\n\nimport javax.annotation.Resource;\nimport javax.transaction.UserTransaction;\n\npublic class A {\n\n    @Resource\n    private UserTransaction utx;\n\n    private int count;\n}\n",
        );
        let dead: BTreeSet<Symbol> = [Symbol::field("com.acme.A", "utx")].into_iter().collect();
        let cleaned = cleanup(&root, &ImportEdits::default(), &dead).unwrap();
        assert_eq!(
            cleaned.to_source(),
            "package com.acme;\n\npublic class A {\n\n    private int count;\n}\n"
        );
    }

    #[test]
    fn conflicting_simple_names_are_an_error() {
        let root = parse("import com.other.Transactional;\nclass A { }\n");
        let result = cleanup(
            &root,
            &edits(&["org.springframework.transaction.annotation.Transactional"], &[]),
            &BTreeSet::new(),
        );
        assert!(result.is_err());
    }
}
