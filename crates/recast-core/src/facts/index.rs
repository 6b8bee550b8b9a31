// Declaration sweep: classes, fields, accessors and module hints of one unit.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ast::SyntaxNode;
use crate::symbols::{base_type_name, classify_type_name, compact_text, DeclaredTypes, ImportTable, TrackedType, TypeEvidence};

use super::{ModuleState, TxFlavor};

const TYPE_DECLARATIONS: &[&str] = &[
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "record_declaration",
    "annotation_type_declaration",
];

const EJB_BEAN_ANNOTATIONS: &[&str] = &["Stateless", "Stateful", "Singleton", "MessageDriven", "TransactionAttribute"];

pub fn is_type_declaration(kind: &str) -> bool {
    TYPE_DECLARATIONS.contains(&kind)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFacts {
    pub type_name: String,
    pub tracked: Option<TrackedType>,
    pub evidence: TypeEvidence,
    pub public: bool,
    /// Declared alone rather than as one of `A a, b;`.
    pub single_declarator: bool,
}

impl FieldFacts {
    /// Tracked transaction field that a cleanup may remove.
    pub fn is_transaction(&self) -> bool {
        self.evidence != TypeEvidence::Different && self.tracked.map(TrackedType::is_transaction).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorFacts {
    pub field: String,
    pub private: bool,
}

#[derive(Debug, Clone)]
pub struct ClassFacts {
    pub fqn: String,
    pub path: PathBuf,
    pub kind: &'static str,
    pub superclass_name: Option<String>,
    /// Resolved when the index is built.
    pub superclass: Option<String>,
    /// Simple names of the annotations on the type declaration.
    pub annotations: Vec<String>,
    pub fields: BTreeMap<String, FieldFacts>,
    /// Zero-argument methods returning one of the fields unchanged.
    pub accessors: BTreeMap<String, AccessorFacts>,
    /// Methods called without a receiver, or on `this`/`super`, inside the class.
    pub self_invoked: BTreeSet<String>,
    pub is_final: bool,
    pub imports: Arc<ImportTable>,
}

/// Everything the declaration sweep learns from one unit.
#[derive(Debug, Clone)]
pub struct UnitIndex {
    pub imports: Arc<ImportTable>,
    pub classes: Vec<ClassFacts>,
    pub module: ModuleState,
}

/// Run the declaration sweep over a parsed unit.
pub fn index_unit(root: &SyntaxNode, path: &Path) -> UnitIndex {
    let imports = Arc::new(ImportTable::from_tree(root));
    let mut indexer = Indexer {
        imports: Arc::clone(&imports),
        path,
        classes: Vec::new(),
        module: ModuleState::default(),
    };

    if let Some(package) = &imports.package {
        indexer.module.packages.insert(package.clone());
    }
    indexer.module.persistence_namespace = imports
        .single
        .values()
        .map(String::as_str)
        .chain(imports.wildcards.iter().map(String::as_str))
        .find_map(|name| {
            if name.starts_with("jakarta.persistence") {
                Some("jakarta".to_string())
            } else if name.starts_with("javax.persistence") {
                Some("javax".to_string())
            } else {
                None
            }
        });

    for child in root.named_children() {
        if is_type_declaration(child.kind()) {
            indexer.index_type(child, None);
        }
    }

    UnitIndex {
        imports,
        classes: indexer.classes,
        module: indexer.module,
    }
}

struct Indexer<'a> {
    imports: Arc<ImportTable>,
    path: &'a Path,
    classes: Vec<ClassFacts>,
    module: ModuleState,
}

impl Indexer<'_> {
    fn index_type(&mut self, node: &SyntaxNode, outer: Option<&str>) {
        let Some(name) = node.child_by_field("name").map(|n| n.text().to_string()) else {
            return;
        };
        let fqn = match (outer, &self.imports.package) {
            (Some(outer), _) => format!("{outer}.{name}"),
            (None, Some(package)) => format!("{package}.{name}"),
            (None, None) => name,
        };

        let modifiers = node.child_of_kind("modifiers");
        let annotations = modifiers.map(|m| annotation_names(m)).unwrap_or_default();
        if annotations.iter().any(|a| a == "EnableTransactionManagement") {
            self.module.transaction_config = Some(self.path.to_path_buf());
        }
        if annotations.iter().any(|a| a == "SpringBootApplication") {
            self.module.boot_application = true;
        }
        if annotations.iter().any(|a| EJB_BEAN_ANNOTATIONS.contains(&a.as_str())) {
            self.module.flavors.insert(TxFlavor::Container);
        }

        let mut facts = ClassFacts {
            fqn: fqn.clone(),
            path: self.path.to_path_buf(),
            kind: node.kind(),
            superclass_name: node
                .child_by_field("superclass")
                .and_then(|s| s.named_children().next())
                .map(|ty| base_type_name(ty)),
            superclass: None,
            annotations,
            fields: BTreeMap::new(),
            accessors: BTreeMap::new(),
            self_invoked: BTreeSet::new(),
            is_final: modifiers.map(|m| m.has_token("final")).unwrap_or(false),
            imports: Arc::clone(&self.imports),
        };

        let mut nested = Vec::new();
        if let Some(body) = node.child_by_field("body") {
            let members = body.named_children().flat_map(|member| {
                // enum constants are followed by a declarations block holding the members
                if member.kind() == "enum_body_declarations" {
                    member.named_children().collect::<Vec<_>>()
                } else {
                    vec![member]
                }
            });
            for member in members {
                match member.kind() {
                    "field_declaration" => index_field(member, &mut facts),
                    "method_declaration" => {
                        if let Some((method, accessor)) = accessor_of(member) {
                            facts.accessors.insert(method, accessor);
                        }
                        if modifiers_of(member).iter().any(|a| EJB_BEAN_ANNOTATIONS.contains(&a.as_str())) {
                            self.module.flavors.insert(TxFlavor::Container);
                        }
                    }
                    kind if is_type_declaration(kind) => nested.push(Arc::clone(member)),
                    _ => {}
                }
            }
            collect_self_calls(body, &mut facts.self_invoked);
        }
        facts.accessors.retain(|_, accessor| facts.fields.contains_key(&accessor.field));

        self.classes.push(facts);
        for member in nested {
            self.index_type(&member, Some(&fqn));
        }
    }
}

fn modifiers_of(declaration: &SyntaxNode) -> Vec<String> {
    declaration
        .child_of_kind("modifiers")
        .map(|m| annotation_names(m))
        .unwrap_or_default()
}

/// Simple names of the annotations in a `modifiers` node.
pub fn annotation_names(modifiers: &SyntaxNode) -> Vec<String> {
    modifiers
        .named_children()
        .filter(|c| matches!(c.kind(), "annotation" | "marker_annotation"))
        .filter_map(|a| a.child_by_field("name"))
        .map(|name| {
            let text = compact_text(name);
            text.rsplit('.').next().unwrap_or(&text).to_string()
        })
        .collect()
}

fn index_field(field: &SyntaxNode, facts: &mut ClassFacts) {
    let public = field.child_of_kind("modifiers").map(|m| m.has_token("public")).unwrap_or(false);
    let Some(type_node) = field.child_by_field("type") else {
        return;
    };
    let type_name = compact_text(type_node);
    let declarators: Vec<_> = field.children_by_field("declarator").collect();
    let single_declarator = declarators.len() == 1;
    for declarator in declarators {
        if let Some(name) = declarator.child_by_field("name") {
            facts.fields.insert(
                name.text().to_string(),
                FieldFacts {
                    type_name: type_name.clone(),
                    tracked: None,
                    evidence: TypeEvidence::Different,
                    public,
                    single_declarator,
                },
            );
        }
    }
}

/// `T getX() { return x; }` or `return this.x;`
fn accessor_of(method: &SyntaxNode) -> Option<(String, AccessorFacts)> {
    let parameters = method.child_by_field("parameters")?;
    if parameters.named_children().next().is_some() {
        return None;
    }
    let body = method.child_by_field("body")?;
    let mut statements = body.named_children();
    let statement = statements.next()?;
    if statements.next().is_some() || statement.kind() != "return_statement" {
        return None;
    }
    let value = statement.named_children().next()?;
    let field = match value.kind() {
        "identifier" => value.text().to_string(),
        "field_access" if value.child_by_field("object").map(|o| o.kind()) == Some("this") => {
            value.child_by_field("field")?.text().to_string()
        }
        _ => return None,
    };
    let private = method.child_of_kind("modifiers").map(|m| m.has_token("private")).unwrap_or(false);
    let name = method.child_by_field("name")?.text().to_string();
    Some((name, AccessorFacts { field, private }))
}

fn collect_self_calls(node: &SyntaxNode, out: &mut BTreeSet<String>) {
    for child in node.children() {
        if is_type_declaration(child.kind()) {
            continue;
        }
        if child.kind() == "method_invocation" {
            let receiver = child.child_by_field("object").map(|o| o.kind());
            if matches!(receiver, None | Some("this") | Some("super")) {
                if let Some(name) = child.child_by_field("name") {
                    out.insert(name.text().to_string());
                }
            }
        }
        collect_self_calls(child, out);
    }
}

/// Resolved, read-only view over every class declared in the run.
#[derive(Debug, Default)]
pub struct ClassIndex {
    classes: BTreeMap<String, ClassFacts>,
}

impl ClassIndex {
    /// Resolve superclass names and field types now that every declaration is known.
    pub fn resolve(mut classes: BTreeMap<String, ClassFacts>) -> Self {
        let declared: BTreeSet<String> = classes.keys().cloned().collect();
        for facts in classes.values_mut() {
            facts.superclass = facts
                .superclass_name
                .as_deref()
                .and_then(|name| resolve_type_reference(name, &facts.fqn, &facts.imports, &declared));
            for field in facts.fields.values_mut() {
                let (tracked, evidence) = classify_type_name(&field.type_name, &facts.imports, &declared);
                field.tracked = tracked;
                field.evidence = evidence;
            }
        }
        Self { classes }
    }

    pub fn get(&self, fqn: &str) -> Option<&ClassFacts> {
        self.classes.get(fqn)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassFacts> {
        self.classes.values()
    }

    pub fn superclass_of(&self, fqn: &str) -> Option<&str> {
        self.classes.get(fqn)?.superclass.as_deref()
    }

    /// The class itself followed by its known superclasses, nearest first.
    pub fn lineage(&self, fqn: &str) -> Vec<String> {
        let mut out = vec![fqn.to_string()];
        let mut current = fqn;
        while let Some(parent) = self.superclass_of(current) {
            if out.iter().any(|seen| seen == parent) {
                break;
            }
            out.push(parent.to_string());
            current = parent;
        }
        out
    }

    /// Whether `method` is called through `this` anywhere in the class's hierarchy.
    pub fn is_self_invoked(&self, class: &str, method: &str) -> bool {
        let calls = |fqn: &str| self.get(fqn).map(|c| c.self_invoked.contains(method)).unwrap_or(false);
        if self.lineage(class).iter().any(|fqn| calls(fqn)) {
            return true;
        }
        self.classes
            .keys()
            .filter(|fqn| fqn.as_str() != class)
            .any(|fqn| calls(fqn) && self.lineage(fqn).iter().any(|ancestor| ancestor == class))
    }
}

impl DeclaredTypes for ClassIndex {
    fn declares_type(&self, fqn: &str) -> bool {
        self.classes.contains_key(fqn)
    }
}

fn resolve_type_reference(
    name: &str,
    from: &str,
    imports: &ImportTable,
    declared: &BTreeSet<String>,
) -> Option<String> {
    if declared.contains(name) {
        return Some(name.to_string());
    }
    let head = name.split('.').next().unwrap_or(name);
    if let Some(fqn) = imports.single.get(head) {
        let rest = &name[head.len()..];
        return Some(format!("{fqn}{rest}"));
    }
    // enclosing scopes, innermost first; the outermost prefix is the package
    let mut scope = from;
    while let Some((outer, _)) = scope.rsplit_once('.') {
        let candidate = format!("{outer}.{name}");
        if declared.contains(&candidate) {
            return Some(candidate);
        }
        scope = outer;
    }
    imports
        .wildcards
        .iter()
        .map(|package| format!("{package}.{name}"))
        .find(|candidate| declared.contains(candidate))
}
