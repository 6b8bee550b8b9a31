use std::cell::RefCell;
use std::collections::HashMap;

use crate::ast::SyntaxNode;
use crate::facts::ClassIndex;

use super::{
    classify_type_name, compact_text, resolve_symbol, ImportTable, OwnerScope, ResolvedSymbol, Symbol,
    SymbolOrigin, TypeEvidence,
};

/// What a name declared in a lexical frame stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Tracked(ResolvedSymbol),
    /// A declaration of some other type that shadows outer names.
    Untracked,
}

#[derive(Debug, Clone)]
enum FieldLookup {
    Tracked(ResolvedSymbol),
    Untracked,
    Absent,
}

/// Lexical environment of the reference walker.
///
/// Frames hold locals and parameters; field lookups fall back to the class
/// index and are memoized for the lifetime of the scope.
pub struct LexicalScope<'a> {
    index: &'a ClassIndex,
    imports: &'a ImportTable,
    classes: Vec<String>,
    method: Option<OwnerScope>,
    frames: Vec<HashMap<String, Binding>>,
    field_cache: RefCell<HashMap<(String, String), FieldLookup>>,
}

impl<'a> LexicalScope<'a> {
    pub fn new(index: &'a ClassIndex, imports: &'a ImportTable) -> Self {
        Self {
            index,
            imports,
            classes: Vec::new(),
            method: None,
            frames: Vec::new(),
            field_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn imports(&self) -> &'a ImportTable {
        self.imports
    }

    pub fn index(&self) -> &'a ClassIndex {
        self.index
    }

    /// Enter a named type declaration and return its fully qualified name.
    pub fn enter_class(&mut self, simple_name: &str) -> String {
        let fqn = match (self.classes.last(), &self.imports.package) {
            (Some(outer), _) => format!("{outer}.{simple_name}"),
            (None, Some(package)) => format!("{package}.{simple_name}"),
            (None, None) => simple_name.to_string(),
        };
        self.classes.push(fqn.clone());
        fqn
    }

    pub fn exit_class(&mut self) {
        self.classes.pop();
    }

    pub fn current_class(&self) -> Option<&str> {
        self.classes.last().map(String::as_str)
    }

    pub fn enter_method(&mut self, owner: OwnerScope) -> Option<OwnerScope> {
        self.method.replace(owner)
    }

    pub fn exit_method(&mut self, previous: Option<OwnerScope>) {
        self.method = previous;
    }

    pub fn method_owner(&self) -> Option<&OwnerScope> {
        self.method.as_ref()
    }

    pub fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn bind(&mut self, name: impl Into<String>, binding: Binding) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), binding);
        }
    }

    /// Resolve a bare name: innermost frame first, then fields of each
    /// enclosing class and its superclasses.
    pub fn lookup(&self, name: &str) -> Option<ResolvedSymbol> {
        for frame in self.frames.iter().rev() {
            if let Some(binding) = frame.get(name) {
                return match binding {
                    Binding::Tracked(resolved) => Some(resolved.clone()),
                    Binding::Untracked => None,
                };
            }
        }
        for class in self.classes.iter().rev() {
            match self.field_lookup(class, name) {
                FieldLookup::Tracked(resolved) => return Some(resolved),
                FieldLookup::Untracked => return None,
                FieldLookup::Absent => {}
            }
        }
        None
    }

    /// `this.name`
    pub fn lookup_field(&self, name: &str) -> Option<ResolvedSymbol> {
        let class = self.current_class()?;
        match self.field_lookup(class, name) {
            FieldLookup::Tracked(resolved) => Some(resolved),
            _ => None,
        }
    }

    /// `super.name`
    pub fn lookup_super_field(&self, name: &str) -> Option<ResolvedSymbol> {
        let superclass = self.index.superclass_of(self.current_class()?)?.to_string();
        match self.field_lookup(&superclass, name) {
            FieldLookup::Tracked(resolved) => Some(resolved),
            _ => None,
        }
    }

    /// Zero-argument accessor called without a receiver or on `this`.
    pub fn lookup_accessor(&self, method: &str) -> Option<ResolvedSymbol> {
        self.classes
            .iter()
            .rev()
            .find_map(|class| self.accessor_lookup(class, method))
    }

    /// `super.getTx()`
    pub fn lookup_super_accessor(&self, method: &str) -> Option<ResolvedSymbol> {
        let superclass = self.index.superclass_of(self.current_class()?)?.to_string();
        self.accessor_lookup(&superclass, method)
    }

    fn accessor_lookup(&self, class: &str, method: &str) -> Option<ResolvedSymbol> {
        for ancestor in self.index.lineage(class) {
            let Some(facts) = self.index.get(&ancestor) else {
                continue;
            };
            if let Some(accessor) = facts.accessors.get(method) {
                return match self.field_lookup(&ancestor, &accessor.field) {
                    FieldLookup::Tracked(resolved) => Some(resolved),
                    _ => None,
                };
            }
        }
        None
    }

    fn field_lookup(&self, class: &str, name: &str) -> FieldLookup {
        let key = (class.to_string(), name.to_string());
        if let Some(cached) = self.field_cache.borrow().get(&key) {
            return cached.clone();
        }
        let result = self.field_lookup_uncached(class, name);
        self.field_cache.borrow_mut().insert(key, result.clone());
        result
    }

    fn field_lookup_uncached(&self, class: &str, name: &str) -> FieldLookup {
        for ancestor in self.index.lineage(class) {
            let Some(field) = self.index.get(&ancestor).and_then(|facts| facts.fields.get(name)) else {
                continue;
            };
            return match field.tracked {
                Some(ty) if field.evidence != TypeEvidence::Different => FieldLookup::Tracked(ResolvedSymbol {
                    symbol: Symbol::field(ancestor.clone(), name),
                    ty,
                    evidence: field.evidence,
                    origin: SymbolOrigin::Field,
                }),
                _ => FieldLookup::Untracked,
            };
        }
        FieldLookup::Absent
    }

    /// Binding for a declared local or parameter.
    ///
    /// A tracked declaration whose initializer resolves to a symbol of the
    /// same type aliases that symbol; the returned flag is `true` in that case.
    /// Otherwise a tracked declaration introduces a method-owned symbol.
    pub fn declare(
        &self,
        name: &str,
        type_node: Option<&SyntaxNode>,
        initializer: Option<&SyntaxNode>,
        origin: SymbolOrigin,
    ) -> (Binding, bool) {
        let type_text = type_node.map(compact_text).unwrap_or_else(|| "var".to_string());
        let aliased = initializer.and_then(|value| resolve_symbol(value, self));

        if type_text == "var" {
            return match aliased {
                Some(resolved) => (Binding::Tracked(resolved), true),
                None => (Binding::Untracked, false),
            };
        }

        let (tracked, evidence) = classify_type_name(&type_text, self.imports, self.index);
        let Some(ty) = tracked else {
            return (Binding::Untracked, false);
        };
        if let Some(resolved) = aliased.filter(|r| r.ty == ty) {
            return (Binding::Tracked(resolved), true);
        }
        match &self.method {
            Some(owner) => (
                Binding::Tracked(ResolvedSymbol {
                    symbol: Symbol::local(owner.clone(), name),
                    ty,
                    evidence,
                    origin,
                }),
                false,
            ),
            None => (Binding::Untracked, false),
        }
    }
}
