/*!
# Symbol Resolution

Identity of tracked transaction objects and the resolver that maps surface
spellings (`tx`, `this.tx`, `getTx()`, `em.getTransaction()`) onto one
canonical [`Symbol`].

Resolution never guesses: an expression that cannot be attributed yields
`None`. When only a simple type name is available the match is accepted as a
secondary signal ([`TypeEvidence::NameOnly`]) and never overrides a declaration
whose type is confirmed to be something else.
*/

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::ast::SyntaxNode;

pub mod scope;

pub use scope::{Binding, LexicalScope};

/// Types whose instances the engine follows across a code base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TrackedType {
    /// JTA `UserTransaction`
    UserTransaction,
    /// JPA resource-local `EntityTransaction`
    EntityTransaction,
    /// JPA `EntityManager`, the context a resource-local transaction is obtained from
    EntityManager,
}

impl TrackedType {
    pub const ALL: [TrackedType; 3] = [
        TrackedType::UserTransaction,
        TrackedType::EntityTransaction,
        TrackedType::EntityManager,
    ];

    pub fn simple_name(self) -> &'static str {
        match self {
            TrackedType::UserTransaction => "UserTransaction",
            TrackedType::EntityTransaction => "EntityTransaction",
            TrackedType::EntityManager => "EntityManager",
        }
    }

    pub fn packages(self) -> &'static [&'static str] {
        match self {
            TrackedType::UserTransaction => &["javax.transaction", "jakarta.transaction"],
            TrackedType::EntityTransaction | TrackedType::EntityManager => {
                &["javax.persistence", "jakarta.persistence"]
            }
        }
    }

    pub fn from_simple_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.simple_name() == name)
    }

    pub fn from_fqn(fqn: &str) -> Option<Self> {
        let (package, name) = fqn.rsplit_once('.')?;
        Self::from_simple_name(name).filter(|t| t.packages().contains(&package))
    }

    /// Whether calls on this type demarcate a transaction.
    pub fn is_transaction(self) -> bool {
        !matches!(self, TrackedType::EntityManager)
    }
}

/// How strongly a declared type is known to be a tracked type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TypeEvidence {
    /// Fully qualified, explicitly imported, or imported through a tracked package wildcard.
    Confirmed,
    /// Only the simple name matches.
    NameOnly,
    /// Known to be some other type.
    Different,
}

/// The declaration a symbol's identity is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum OwnerScope {
    /// A field of the named class.
    Class(String),
    /// A parameter or local of one method, keyed by its full signature.
    Method { class: String, signature: String },
}

impl OwnerScope {
    pub fn class_name(&self) -> &str {
        match self {
            OwnerScope::Class(class) | OwnerScope::Method { class, .. } => class,
        }
    }
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerScope::Class(class) => write!(f, "{class}"),
            OwnerScope::Method { class, signature } => write!(f, "{class}#{signature}"),
        }
    }
}

/// Canonical identity of a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Symbol {
    pub owner: OwnerScope,
    pub name: String,
    /// Accessor called on the context symbol `name` to derive this one.
    pub accessor: Option<String>,
}

impl Symbol {
    pub fn field(class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: OwnerScope::Class(class.into()),
            name: name.into(),
            accessor: None,
        }
    }

    pub fn local(owner: OwnerScope, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            accessor: None,
        }
    }

    /// Symbol obtained by calling `accessor()` on this one.
    pub fn derive(&self, accessor: &str) -> Self {
        Self {
            owner: self.owner.clone(),
            name: self.name.clone(),
            accessor: Some(accessor.to_string()),
        }
    }

    pub fn is_derived(&self) -> bool {
        self.accessor.is_some()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)?;
        if let Some(accessor) = &self.accessor {
            write!(f, ".{accessor}()")?;
        }
        Ok(())
    }
}

/// Where the value behind a symbol comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SymbolOrigin {
    Field,
    Parameter,
    Local,
}

/// A symbol together with what is known about its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedSymbol {
    pub symbol: Symbol,
    pub ty: TrackedType,
    pub evidence: TypeEvidence,
    /// Origin of the symbol, or of its context symbol when derived.
    pub origin: SymbolOrigin,
}

/// Import declarations and type names of one compilation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTable {
    pub package: Option<String>,
    /// Simple name to fully qualified name.
    pub single: BTreeMap<String, String>,
    /// Packages imported with `.*`.
    pub wildcards: BTreeSet<String>,
    /// Statically imported member name to `Type.member`.
    pub static_members: BTreeMap<String, String>,
    /// Types whose members are imported with `import static T.*`.
    pub static_wildcards: BTreeSet<String>,
    /// Simple names of every type declared in the unit.
    pub local_types: BTreeSet<String>,
}

impl ImportTable {
    pub fn from_tree(root: &SyntaxNode) -> Self {
        let mut table = ImportTable::default();
        for child in root.named_children() {
            match child.kind() {
                "package_declaration" => {
                    table.package = child
                        .named_children()
                        .find(|c| matches!(c.kind(), "identifier" | "scoped_identifier"))
                        .map(|name| compact_text(name));
                }
                "import_declaration" => table.add_import(child),
                _ => {}
            }
        }
        root.visit(&mut |node| {
            if matches!(
                node.kind(),
                "class_declaration" | "interface_declaration" | "enum_declaration" | "record_declaration"
                    | "annotation_type_declaration"
            ) {
                if let Some(name) = node.child_by_field("name") {
                    table.local_types.insert(name.text().to_string());
                }
            }
        });
        table
    }

    fn add_import(&mut self, import: &SyntaxNode) {
        let is_static = import.has_token("static");
        let is_wildcard = import.child_of_kind("asterisk").is_some();
        let Some(name) = import
            .named_children()
            .find(|c| matches!(c.kind(), "identifier" | "scoped_identifier"))
        else {
            return;
        };
        let fqn = compact_text(name);
        match (is_static, is_wildcard) {
            (false, false) => {
                let simple = fqn.rsplit('.').next().unwrap_or(&fqn).to_string();
                self.single.insert(simple, fqn);
            }
            (false, true) => {
                self.wildcards.insert(fqn);
            }
            (true, false) => {
                let member = fqn.rsplit('.').next().unwrap_or(&fqn).to_string();
                self.static_members.insert(member, fqn);
            }
            (true, true) => {
                self.static_wildcards.insert(fqn);
            }
        }
    }

    /// Fully qualified name a simple type name refers to, when known.
    pub fn qualify(&self, simple: &str) -> Option<String> {
        if let Some(fqn) = self.single.get(simple) {
            return Some(fqn.clone());
        }
        self.package.as_ref().map(|package| format!("{package}.{simple}"))
    }

    /// Whether `member` is statically imported, explicitly or by wildcard, from a
    /// type with one of the given simple names.
    pub fn imports_member(&self, type_simple_names: &[&str], member: &str) -> bool {
        let from_type = |owner: &str| {
            let simple = owner.rsplit('.').next().unwrap_or(owner);
            type_simple_names.contains(&simple)
        };
        if let Some(fqn) = self.static_members.get(member) {
            return fqn.rsplit_once('.').map(|(owner, _)| from_type(owner)).unwrap_or(false);
        }
        self.static_wildcards.iter().any(|owner| from_type(owner))
    }
}

/// Anything that can answer whether a fully qualified type is declared in the run.
pub trait DeclaredTypes {
    fn declares_type(&self, fqn: &str) -> bool;
}

impl DeclaredTypes for BTreeSet<String> {
    fn declares_type(&self, fqn: &str) -> bool {
        self.contains(fqn)
    }
}

/// Classify a declared type name written in a unit with the given imports.
pub fn classify_type_name(
    name: &str,
    imports: &ImportTable,
    declared: &dyn DeclaredTypes,
) -> (Option<TrackedType>, TypeEvidence) {
    if name.contains('.') {
        return match TrackedType::from_fqn(name) {
            Some(ty) => (Some(ty), TypeEvidence::Confirmed),
            None => (None, TypeEvidence::Different),
        };
    }
    if let Some(fqn) = imports.single.get(name) {
        return match TrackedType::from_fqn(fqn) {
            Some(ty) => (Some(ty), TypeEvidence::Confirmed),
            None => (None, TypeEvidence::Different),
        };
    }
    if imports.local_types.contains(name) {
        return (None, TypeEvidence::Different);
    }
    let same_package = match &imports.package {
        Some(package) => format!("{package}.{name}"),
        None => name.to_string(),
    };
    if declared.declares_type(&same_package) {
        return (None, TypeEvidence::Different);
    }
    match TrackedType::from_simple_name(name) {
        Some(ty) if ty.packages().iter().any(|p| imports.wildcards.contains(*p)) => (Some(ty), TypeEvidence::Confirmed),
        Some(ty) => (Some(ty), TypeEvidence::NameOnly),
        None => (None, TypeEvidence::Different),
    }
}

/// Text of a node with all inter-token whitespace removed.
pub fn compact_text(node: &SyntaxNode) -> String {
    let mut out = String::new();
    node.visit(&mut |n| {
        if n.is_leaf() && !n.is_comment() {
            out.push_str(n.text());
        }
    });
    out
}

/// Base name of a declared type, dropping type arguments (`Base<T>` is `Base`).
pub fn base_type_name(type_node: &SyntaxNode) -> String {
    match type_node.kind() {
        "generic_type" => type_node
            .named_children()
            .next()
            .map(|base| compact_text(base))
            .unwrap_or_default(),
        _ => compact_text(type_node),
    }
}

/// Resolve an expression to the tracked symbol it denotes.
///
/// Handles bare identifiers (locals, parameters, own and inherited fields),
/// `this.name` and `super.name`, zero-argument accessors such as `getTx()`,
/// `ctx.getTransaction()` on an entity manager, and parenthesized forms of all
/// of these.
pub fn resolve_symbol(node: &SyntaxNode, scope: &LexicalScope<'_>) -> Option<ResolvedSymbol> {
    match node.kind() {
        "identifier" => scope.lookup(node.text()),
        "parenthesized_expression" => node.named_children().next().and_then(|inner| resolve_symbol(inner, scope)),
        "field_access" => {
            let object = node.child_by_field("object")?;
            let field = node.child_by_field("field")?;
            match object.kind() {
                "this" => scope.lookup_field(field.text()),
                "super" => scope.lookup_super_field(field.text()),
                _ => None,
            }
        }
        "method_invocation" => {
            let name = node.child_by_field("name")?.text();
            let argument_count = node
                .child_by_field("arguments")
                .map(|args| args.named_children().count())
                .unwrap_or(0);
            if argument_count != 0 {
                return None;
            }
            let object = node.child_by_field("object");
            if name == "getTransaction" {
                let context = resolve_symbol(object?, scope)?;
                if context.ty != TrackedType::EntityManager {
                    return None;
                }
                return Some(ResolvedSymbol {
                    symbol: context.symbol.derive(name),
                    ty: TrackedType::EntityTransaction,
                    evidence: context.evidence,
                    origin: context.origin,
                });
            }
            match object.map(|o| o.kind()) {
                None | Some("this") => scope.lookup_accessor(name),
                Some("super") => scope.lookup_super_accessor(name),
                _ => None,
            }
        }
        _ => None,
    }
}
