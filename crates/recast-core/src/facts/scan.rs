//! Reference sweep.
//!
//! Walks one unit with a lexical scope and records every site where a tracked
//! transaction symbol is referenced, together with the structure around it:
//! the enclosing statement and method, the outermost loop, deferred bodies
//! (lambdas, anonymous and local classes) and the guarded regions of every
//! enclosing `try`.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::ast::{NodePath, SyntaxNode};
use crate::symbols::{
    compact_text, resolve_symbol, Binding, ImportTable, LexicalScope, OwnerScope, ResolvedSymbol, Symbol,
    SymbolOrigin,
};

use super::index::{annotation_names, is_type_declaration, ClassIndex};
use super::CallKind;

/// Calls whose lambda argument runs once per element.
const ITERATING_CALLS: &[&str] = &["forEach", "forEachOrdered", "forEachRemaining", "replaceAll", "removeIf"];

const STATEMENTS: &[&str] = &[
    "expression_statement",
    "local_variable_declaration",
    "return_statement",
    "throw_statement",
    "if_statement",
    "try_statement",
    "try_with_resources_statement",
    "for_statement",
    "enhanced_for_statement",
    "while_statement",
    "do_statement",
    "switch_expression",
    "synchronized_statement",
    "labeled_statement",
    "yield_statement",
    "assert_statement",
    "break_statement",
    "continue_statement",
    "explicit_constructor_invocation",
];

/// Part of a `try` statement a reference sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Region {
    Resources,
    Body,
    /// The n-th catch clause.
    Handler(usize),
    Finally,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuardFrame {
    pub try_path: NodePath,
    pub region: Region,
}

/// How a reference site uses its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Receiver of a call.
    Call(CallKind),
    /// Initializer of a local that aliases the symbol.
    Alias,
    /// Assigned in a constructor.
    Initialized,
    /// Compared with `==` or `!=`.
    Inspected,
    Reassigned,
    /// Returned from a private accessor.
    AccessorReturn,
    /// Anything the scan cannot follow.
    Escape,
}

#[derive(Debug, Clone)]
pub struct Reference {
    pub resolved: ResolvedSymbol,
    pub path: NodePath,
    pub role: Role,
    /// The invocation, when the reference is the receiver of a call.
    pub call_path: Option<NodePath>,
    /// Innermost enclosing statement.
    pub statement: Option<NodePath>,
    pub method: Option<NodePath>,
    /// Outermost repetition construct within the method.
    pub loop_path: Option<NodePath>,
    /// Outermost lambda or class body whose execution is deferred.
    pub deferred: Option<NodePath>,
    /// Enclosing guarded regions within the method, outermost first.
    pub guards: Vec<GuardFrame>,
}

impl Reference {
    pub fn symbol(&self) -> &Symbol {
        &self.resolved.symbol
    }

    pub fn call_kind(&self) -> Option<CallKind> {
        match self.role {
            Role::Call(kind) => Some(kind),
            _ => None,
        }
    }

    /// Innermost guarded region, `None` at method level.
    pub fn region(&self) -> Option<&GuardFrame> {
        self.guards.last()
    }
}

/// Declaration-level facts about a method or constructor.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub path: NodePath,
    pub owner: OwnerScope,
    pub class: String,
    pub name: String,
    pub is_constructor: bool,
    /// Keyword modifiers such as `public` or `static`.
    pub modifiers: BTreeSet<String>,
    /// Simple names of the annotations on the declaration.
    pub annotations: Vec<String>,
    pub class_final: bool,
    pub class_kind: &'static str,
}

impl MethodInfo {
    pub fn has_modifier(&self, keyword: &str) -> bool {
        self.modifiers.contains(keyword)
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnitScan {
    pub references: Vec<Reference>,
    pub methods: Vec<MethodInfo>,
}

impl UnitScan {
    /// References at or below `path`.
    pub fn references_in<'s>(&'s self, path: &'s [usize]) -> impl Iterator<Item = &'s Reference> + 's {
        self.references.iter().filter(move |r| r.path.starts_with(path))
    }
}

/// Run the reference sweep over one unit.
pub fn scan_unit(root: &Arc<SyntaxNode>, imports: &ImportTable, index: &ClassIndex) -> UnitScan {
    let mut collector = Collector {
        scope: LexicalScope::new(index, imports),
        path: Vec::new(),
        ancestors: Vec::new(),
        statements: Vec::new(),
        loops: Vec::new(),
        deferred: Vec::new(),
        guards: Vec::new(),
        method: None,
        in_constructor: false,
        private_accessor: false,
        alias_values: HashSet::new(),
        out: UnitScan::default(),
    };
    collector.walk_children(root);
    collector.out
}

struct Collector<'a> {
    scope: LexicalScope<'a>,
    path: NodePath,
    ancestors: Vec<Arc<SyntaxNode>>,
    statements: Vec<NodePath>,
    loops: Vec<NodePath>,
    deferred: Vec<NodePath>,
    guards: Vec<GuardFrame>,
    method: Option<NodePath>,
    in_constructor: bool,
    private_accessor: bool,
    alias_values: HashSet<NodePath>,
    out: UnitScan,
}

impl Collector<'_> {
    fn walk_children(&mut self, node: &Arc<SyntaxNode>) {
        for index in 0..node.children().len() {
            self.walk_at(node, index);
        }
    }

    fn walk_at(&mut self, parent: &Arc<SyntaxNode>, index: usize) {
        let Some(child) = parent.child(index).cloned() else {
            return;
        };
        self.ancestors.push(Arc::clone(parent));
        self.path.push(index);
        self.walk(&child);
        self.path.pop();
        self.ancestors.pop();
    }

    fn walk(&mut self, node: &Arc<SyntaxNode>) {
        if node.is_leaf() && node.kind() != "identifier" {
            return;
        }
        let statement = self.method.is_some() && STATEMENTS.contains(&node.kind());
        if statement {
            self.statements.push(self.path.clone());
        }

        match node.kind() {
            kind if is_type_declaration(kind) => self.walk_type(node),
            "method_declaration" | "constructor_declaration" => self.walk_method(node),
            "lambda_expression" => self.walk_lambda(node),
            "object_creation_expression" => self.walk_object_creation(node),
            "block" | "constructor_body" | "switch_block" => {
                self.scope.push_frame();
                self.walk_children(node);
                self.scope.pop_frame();
            }
            "local_variable_declaration" => self.walk_local(node),
            "resource" => self.walk_resource(node),
            "for_statement" => self.walk_for(node),
            "enhanced_for_statement" => self.walk_enhanced_for(node),
            "while_statement" | "do_statement" => {
                self.loops.push(self.path.clone());
                self.walk_children(node);
                self.loops.pop();
            }
            "try_statement" | "try_with_resources_statement" => self.walk_try(node),
            "catch_clause" => self.walk_catch(node),
            "identifier" | "field_access" | "method_invocation" => {
                self.visit_reference(node);
                self.walk_children(node);
            }
            _ => self.walk_children(node),
        }

        if statement {
            self.statements.pop();
        }
    }

    fn walk_type(&mut self, node: &Arc<SyntaxNode>) {
        if self.method.is_some() {
            // local classes run whenever their methods are called
            self.deferred.push(self.path.clone());
            self.walk_children(node);
            self.deferred.pop();
            return;
        }
        let Some(name) = node.child_by_field("name").map(|n| n.text().to_string()) else {
            return;
        };
        self.scope.enter_class(&name);
        self.walk_children(node);
        self.scope.exit_class();
    }

    fn walk_method(&mut self, node: &Arc<SyntaxNode>) {
        let class = match (&self.method, self.scope.current_class()) {
            (None, Some(class)) => class.to_string(),
            _ => {
                // method of an anonymous or local class
                self.scope.push_frame();
                self.bind_parameters(node);
                self.walk_children(node);
                self.scope.pop_frame();
                return;
            }
        };

        let name = node.child_by_field("name").map(|n| n.text().to_string()).unwrap_or_default();
        let parameter_types: Vec<String> = node
            .child_by_field("parameters")
            .map(|params| {
                params
                    .named_children()
                    .filter_map(|p| p.child_by_field("type").or_else(|| p.named_children().next()))
                    .map(|ty| compact_text(ty))
                    .collect()
            })
            .unwrap_or_default();
        let owner = OwnerScope::Method {
            class: class.clone(),
            signature: format!("{name}({})", parameter_types.join(",")),
        };
        let modifiers = node.child_of_kind("modifiers");
        let class_facts = self.scope.index().get(&class);
        let info = MethodInfo {
            path: self.path.clone(),
            owner: owner.clone(),
            class: class.clone(),
            name: name.clone(),
            is_constructor: node.kind() == "constructor_declaration",
            modifiers: modifiers
                .map(|m| {
                    m.children()
                        .iter()
                        .filter(|c| !c.is_named())
                        .map(|c| c.text().to_string())
                        .collect()
                })
                .unwrap_or_default(),
            annotations: modifiers.map(|m| annotation_names(m)).unwrap_or_default(),
            class_final: class_facts.map(|c| c.is_final).unwrap_or(false),
            class_kind: class_facts.map(|c| c.kind).unwrap_or("class_declaration"),
        };
        self.private_accessor = class_facts
            .and_then(|c| c.accessors.get(&name))
            .map(|a| a.private)
            .unwrap_or(false);
        self.in_constructor = info.is_constructor;
        self.out.methods.push(info);

        let previous = self.scope.enter_method(owner);
        let loops = std::mem::take(&mut self.loops);
        let deferred = std::mem::take(&mut self.deferred);
        let guards = std::mem::take(&mut self.guards);
        self.method = Some(self.path.clone());

        self.scope.push_frame();
        self.bind_parameters(node);
        self.walk_children(node);
        self.scope.pop_frame();

        self.method = None;
        self.loops = loops;
        self.deferred = deferred;
        self.guards = guards;
        self.private_accessor = false;
        self.in_constructor = false;
        self.scope.exit_method(previous);
    }

    fn bind_parameters(&mut self, node: &SyntaxNode) {
        let Some(params) = node.child_by_field("parameters") else {
            return;
        };
        for param in params.named_children() {
            let name = param
                .child_by_field("name")
                .or_else(|| param.child_of_kind("variable_declarator").and_then(|d| d.child_by_field("name")));
            let Some(name) = name else {
                continue;
            };
            let binding = match param.kind() {
                "formal_parameter" => {
                    self.scope
                        .declare(name.text(), param.child_by_field("type").map(|t| t.as_ref()), None, SymbolOrigin::Parameter)
                        .0
                }
                _ => Binding::Untracked,
            };
            self.scope.bind(name.text(), binding);
        }
    }

    fn walk_lambda(&mut self, node: &Arc<SyntaxNode>) {
        let iterates = self.lambda_iterates();
        if iterates {
            self.loops.push(self.path.clone());
        } else {
            self.deferred.push(self.path.clone());
        }
        self.scope.push_frame();
        if let Some(params) = node.child_by_field("parameters") {
            match params.kind() {
                "identifier" => self.scope.bind(params.text(), Binding::Untracked),
                "formal_parameters" => self.bind_parameters(node),
                _ => {
                    for param in params.named_children().filter(|p| p.kind() == "identifier") {
                        self.scope.bind(param.text(), Binding::Untracked);
                    }
                }
            }
        }
        self.walk_children(node);
        self.scope.pop_frame();
        if iterates {
            self.loops.pop();
        } else {
            self.deferred.pop();
        }
    }

    /// Lambda passed directly to one of the per-element iteration calls.
    fn lambda_iterates(&self) -> bool {
        let depth = self.ancestors.len();
        if depth < 2 || self.ancestors[depth - 1].kind() != "argument_list" {
            return false;
        }
        let call = &self.ancestors[depth - 2];
        call.kind() == "method_invocation"
            && call
                .child_by_field("name")
                .map(|n| ITERATING_CALLS.contains(&n.text()))
                .unwrap_or(false)
    }

    fn walk_object_creation(&mut self, node: &Arc<SyntaxNode>) {
        for index in 0..node.children().len() {
            let anonymous = node.child(index).map(|c| c.kind() == "class_body").unwrap_or(false);
            if anonymous {
                let mut body = self.path.clone();
                body.push(index);
                self.deferred.push(body);
                self.walk_at(node, index);
                self.deferred.pop();
            } else {
                self.walk_at(node, index);
            }
        }
    }

    fn walk_local(&mut self, node: &Arc<SyntaxNode>) {
        let type_node = node.child_by_field("type").cloned();
        let mut bindings = Vec::new();
        for (index, declarator) in node.children().iter().enumerate() {
            if declarator.field() != Some("declarator") {
                continue;
            }
            let Some(name) = declarator.child_by_field("name") else {
                continue;
            };
            let value_index = declarator.child_index_by_field("value");
            let value = value_index.and_then(|i| declarator.child(i));
            let (binding, aliased) =
                self.scope
                    .declare(name.text(), type_node.as_deref(), value.map(|v| v.as_ref()), SymbolOrigin::Local);
            if let (true, Some(value_index)) = (aliased, value_index) {
                let mut value_path = self.path.clone();
                value_path.extend([index, value_index]);
                self.alias_values.insert(value_path);
            }
            bindings.push((name.text().to_string(), binding));
        }
        self.walk_children(node);
        for (name, binding) in bindings {
            self.scope.bind(name, binding);
        }
    }

    fn walk_resource(&mut self, node: &Arc<SyntaxNode>) {
        let Some(name) = node.child_by_field("name").map(|n| n.text().to_string()) else {
            self.walk_children(node);
            return;
        };
        let value_index = node.child_index_by_field("value");
        let value = value_index.and_then(|i| node.child(i));
        let (binding, aliased) = self.scope.declare(
            &name,
            node.child_by_field("type").map(|t| t.as_ref()),
            value.map(|v| v.as_ref()),
            SymbolOrigin::Local,
        );
        if let (true, Some(value_index)) = (aliased, value_index) {
            let mut value_path = self.path.clone();
            value_path.push(value_index);
            self.alias_values.insert(value_path);
        }
        self.walk_children(node);
        self.scope.bind(name, binding);
    }

    fn walk_for(&mut self, node: &Arc<SyntaxNode>) {
        let loop_path = self.path.clone();
        self.scope.push_frame();
        for index in 0..node.children().len() {
            let repeated = node
                .child(index)
                .map(|c| c.is_named() && c.field() != Some("init"))
                .unwrap_or(false);
            if repeated {
                self.loops.push(loop_path.clone());
                self.walk_at(node, index);
                self.loops.pop();
            } else {
                self.walk_at(node, index);
            }
        }
        self.scope.pop_frame();
    }

    fn walk_enhanced_for(&mut self, node: &Arc<SyntaxNode>) {
        let loop_path = self.path.clone();
        self.scope.push_frame();
        for index in 0..node.children().len() {
            let is_body = node.child(index).map(|c| c.field() == Some("body")).unwrap_or(false);
            if !is_body {
                self.walk_at(node, index);
                continue;
            }
            if let Some(name) = node.child_by_field("name") {
                let (binding, _) = self.scope.declare(
                    name.text(),
                    node.child_by_field("type").map(|t| t.as_ref()),
                    None,
                    SymbolOrigin::Local,
                );
                self.scope.bind(name.text(), binding);
            }
            self.loops.push(loop_path.clone());
            self.walk_at(node, index);
            self.loops.pop();
        }
        self.scope.pop_frame();
    }

    fn walk_try(&mut self, node: &Arc<SyntaxNode>) {
        let try_path = self.path.clone();
        self.scope.push_frame();
        let mut handler = 0;
        for index in 0..node.children().len() {
            let Some(child) = node.child(index) else {
                continue;
            };
            let region = match (child.field(), child.kind()) {
                (Some("resources"), _) => Some(Region::Resources),
                (Some("body"), _) => Some(Region::Body),
                (_, "catch_clause") => {
                    handler += 1;
                    Some(Region::Handler(handler - 1))
                }
                (_, "finally_clause") => Some(Region::Finally),
                _ => None,
            };
            match region {
                Some(region) => {
                    self.guards.push(GuardFrame {
                        try_path: try_path.clone(),
                        region,
                    });
                    self.walk_at(node, index);
                    self.guards.pop();
                }
                None => self.walk_at(node, index),
            }
        }
        self.scope.pop_frame();
    }

    fn walk_catch(&mut self, node: &Arc<SyntaxNode>) {
        self.scope.push_frame();
        if let Some(name) = node
            .child_of_kind("catch_formal_parameter")
            .and_then(|p| p.child_by_field("name"))
        {
            self.scope.bind(name.text(), Binding::Untracked);
        }
        self.walk_children(node);
        self.scope.pop_frame();
    }

    fn is_expression_identifier(&self, node: &SyntaxNode) -> bool {
        if matches!(
            node.field(),
            Some("name" | "field" | "key" | "label" | "type" | "dimensions" | "scope" | "parameters")
        ) {
            return false;
        }
        let Some(parent) = self.ancestors.last() else {
            return false;
        };
        !matches!(
            parent.kind(),
            "inferred_parameters"
                | "scoped_identifier"
                | "package_declaration"
                | "import_declaration"
                | "marker_annotation"
                | "annotation"
                | "labeled_statement"
                | "break_statement"
                | "continue_statement"
                | "enum_constant"
                | "formal_parameter"
                | "catch_formal_parameter"
                | "spread_parameter"
                | "lambda_expression"
        )
    }

    fn visit_reference(&mut self, node: &SyntaxNode) {
        if node.kind() == "identifier" && !self.is_expression_identifier(node) {
            return;
        }
        let Some(resolved) = resolve_symbol(node, &self.scope) else {
            return;
        };
        if !resolved.ty.is_transaction() {
            return;
        }
        let role = self.role_of(node, &resolved);
        let call_path = match role {
            Role::Call(_) => Some(self.path[..self.path.len().saturating_sub(1)].to_vec()),
            _ => None,
        };
        self.out.references.push(Reference {
            resolved,
            path: self.path.clone(),
            role,
            call_path,
            statement: self.statements.last().cloned(),
            method: self.method.clone(),
            loop_path: self.loops.first().cloned(),
            deferred: self.deferred.first().cloned(),
            guards: self.guards.clone(),
        });
    }

    fn role_of(&self, node: &SyntaxNode, resolved: &ResolvedSymbol) -> Role {
        let Some(parent) = self.ancestors.last() else {
            return Role::Escape;
        };
        match (parent.kind(), node.field()) {
            ("method_invocation", Some("object")) => {
                let method = parent.child_by_field("name").map(|n| n.text()).unwrap_or_default();
                Role::Call(CallKind::from_method(resolved.ty, method))
            }
            ("variable_declarator" | "resource", Some("value")) if self.alias_values.contains(&self.path) => Role::Alias,
            ("assignment_expression", Some("left")) if self.in_constructor && self.deferred.is_empty() => {
                Role::Initialized
            }
            ("assignment_expression", Some("left")) => Role::Reassigned,
            ("return_statement", _) if self.private_accessor => Role::AccessorReturn,
            ("binary_expression", _) if parent.has_token("==") || parent.has_token("!=") => Role::Inspected,
            _ => Role::Escape,
        }
    }
}
