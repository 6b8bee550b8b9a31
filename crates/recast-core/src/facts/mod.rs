//! Accumulated facts about tracked symbols, declared classes and modules.
//!
//! The [`FactStore`] is written concurrently by the scan sweeps. Every write is
//! a key-wise merge (set union or counter addition) so the final content does
//! not depend on the order units were scanned in. Once both sweeps finish the
//! store is frozen into read-only [`Facts`] for the decision pass.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::symbols::{Symbol, TrackedType};

pub mod index;
pub mod scan;

pub use index::{annotation_names, index_unit, AccessorFacts, ClassFacts, ClassIndex, FieldFacts, UnitIndex};
pub use scan::{scan_unit, GuardFrame, MethodInfo, Reference, Region, Role, UnitScan};

/// Transaction-demarcating operation observed on a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CallKind {
    Begin,
    Commit,
    Rollback,
    SetTimeout,
    SetRollbackOnly,
    Status,
    Other,
}

impl CallKind {
    pub fn from_method(ty: TrackedType, method: &str) -> Self {
        match (ty, method) {
            (_, "begin") => CallKind::Begin,
            (_, "commit") => CallKind::Commit,
            (_, "rollback") => CallKind::Rollback,
            (TrackedType::UserTransaction, "setTransactionTimeout") => CallKind::SetTimeout,
            (_, "setRollbackOnly") => CallKind::SetRollbackOnly,
            (TrackedType::UserTransaction, "getStatus") => CallKind::Status,
            (TrackedType::EntityTransaction, "isActive" | "getRollbackOnly") => CallKind::Status,
            _ => CallKind::Other,
        }
    }
}

/// Reasons a symbol cannot be reasoned about locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Ambiguity {
    /// Declared through a simple type name only.
    NameOnlyType,
    /// Passed, returned or stored somewhere the scan cannot follow.
    Escapes,
    /// Assigned after its declaration.
    Reassigned,
    /// Used inside a lambda or anonymous class body.
    DeferredUse,
}

/// Everything recorded about one symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageFact {
    pub call_kinds: BTreeSet<CallKind>,
    pub counts: BTreeMap<CallKind, u32>,
    pub ambiguity: BTreeSet<Ambiguity>,
    /// Number of reference sites, calls or not.
    pub sites: u32,
}

impl UsageFact {
    pub fn count(&self, kind: CallKind) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn is_ambiguous(&self, ambiguity: Ambiguity) -> bool {
        self.ambiguity.contains(&ambiguity)
    }
}

/// Transaction management style a module relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TxFlavor {
    /// JTA `UserTransaction`
    Jta,
    /// JPA `EntityTransaction`
    ResourceLocal,
    /// EJB container-managed attributes, served by a JTA manager
    Container,
}

impl TxFlavor {
    pub fn of(ty: TrackedType) -> Option<Self> {
        match ty {
            TrackedType::UserTransaction => Some(TxFlavor::Jta),
            TrackedType::EntityTransaction => Some(TxFlavor::ResourceLocal),
            TrackedType::EntityManager => None,
        }
    }

    /// Flavor of the transaction manager that serves this style.
    pub fn manager(self) -> Self {
        match self {
            TxFlavor::Container => TxFlavor::Jta,
            other => other,
        }
    }
}

/// Per-module facts used by the configuration decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleState {
    /// A unit already declaring `@EnableTransactionManagement`.
    pub transaction_config: Option<PathBuf>,
    pub boot_application: bool,
    /// Keys declared in the module's properties files.
    pub declared_keys: BTreeSet<String>,
    pub flavors: BTreeSet<TxFlavor>,
    /// `javax` or `jakarta`, when the module imports persistence types.
    pub persistence_namespace: Option<String>,
    /// Packages of the module's main sources.
    pub packages: BTreeSet<String>,
    /// Directory main sources are rooted at.
    pub source_root: Option<PathBuf>,
}

impl ModuleState {
    pub fn merge(&mut self, other: ModuleState) {
        self.transaction_config = match (self.transaction_config.take(), other.transaction_config) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.boot_application |= other.boot_application;
        self.declared_keys.extend(other.declared_keys);
        self.flavors.extend(other.flavors);
        self.persistence_namespace = match (self.persistence_namespace.take(), other.persistence_namespace) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.packages.extend(other.packages);
        self.source_root = match (self.source_root.take(), other.source_root) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    /// Whether boot-style auto-configuration keys already configure transactions.
    pub fn has_auto_configuration_keys(&self) -> bool {
        self.declared_keys
            .iter()
            .any(|key| key.starts_with("spring.datasource.") || key.starts_with("spring.jpa.") || key.starts_with("spring.jta."))
    }

    /// Longest common package prefix of the module's main sources.
    pub fn base_package(&self) -> Option<String> {
        let mut packages = self.packages.iter().filter(|p| !p.is_empty());
        let first: Vec<&str> = packages.next()?.split('.').collect();
        let mut common = first.len();
        for package in packages {
            let shared = package
                .split('.')
                .zip(first.iter())
                .take_while(|(a, b)| a == *b)
                .count();
            common = common.min(shared);
        }
        if common == 0 {
            return self.packages.iter().find(|p| !p.is_empty()).cloned();
        }
        Some(first[..common].join("."))
    }

    /// Flavors normalized to the manager that would serve them.
    pub fn manager_flavors(&self) -> BTreeSet<TxFlavor> {
        self.flavors.iter().map(|f| f.manager()).collect()
    }
}

/// Concurrent accumulator written by the scan sweeps.
#[derive(Default)]
pub struct FactStore {
    usages: DashMap<Symbol, UsageFact>,
    classes: DashMap<String, ClassFacts>,
    modules: DashMap<PathBuf, ModuleState>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one reference site of `symbol`, optionally a call.
    pub fn record(&self, symbol: &Symbol, call: Option<CallKind>) {
        let mut usage = self.usages.entry(symbol.clone()).or_default();
        usage.sites += 1;
        if let Some(kind) = call {
            usage.call_kinds.insert(kind);
            *usage.counts.entry(kind).or_insert(0) += 1;
        }
    }

    pub fn record_ambiguity(&self, symbol: &Symbol, ambiguity: Ambiguity) {
        self.usages.entry(symbol.clone()).or_default().ambiguity.insert(ambiguity);
    }

    /// Record a declared class. When two units declare the same name the one
    /// with the smaller path wins so the outcome is order independent.
    pub fn record_class(&self, facts: ClassFacts) {
        match self.classes.entry(facts.fqn.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                if facts.path < existing.get().path {
                    debug!("duplicate declaration of {} in {}", facts.fqn, facts.path.display());
                    existing.insert(facts);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(facts);
            }
        }
    }

    pub fn merge_module(&self, module: &Path, state: ModuleState) {
        self.modules.entry(module.to_path_buf()).or_default().merge(state);
    }

    /// Snapshot of what is known about a module so far.
    pub fn existence_check(&self, module: &Path) -> ModuleState {
        self.modules.get(module).map(|m| m.clone()).unwrap_or_default()
    }

    /// Resolve the declarations recorded so far into a read-only index.
    pub fn class_index(&self) -> ClassIndex {
        let raw: BTreeMap<String, ClassFacts> = self
            .classes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        ClassIndex::resolve(raw)
    }

    pub fn freeze(self, classes: ClassIndex) -> Facts {
        Facts {
            usages: self.usages.into_iter().collect(),
            classes,
            modules: self.modules.into_iter().collect(),
        }
    }
}

/// Read-only facts used by the decision and cleanup passes.
#[derive(Debug, Default)]
pub struct Facts {
    usages: BTreeMap<Symbol, UsageFact>,
    classes: ClassIndex,
    modules: BTreeMap<PathBuf, ModuleState>,
}

impl Facts {
    pub fn usage(&self, symbol: &Symbol) -> Option<&UsageFact> {
        self.usages.get(symbol)
    }

    pub fn usages(&self) -> impl Iterator<Item = (&Symbol, &UsageFact)> {
        self.usages.iter()
    }

    pub fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    pub fn module(&self, root: &Path) -> Option<&ModuleState> {
        self.modules.get(root)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&PathBuf, &ModuleState)> {
        self.modules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_records_merge_by_key() {
        let store = Arc::new(FactStore::new());
        let symbol = Symbol::field("com.acme.A", "utx");
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let symbol = symbol.clone();
                thread::spawn(move || {
                    store.record(&symbol, Some(if i % 2 == 0 { CallKind::Begin } else { CallKind::Commit }));
                    if i == 3 {
                        store.record_ambiguity(&symbol, Ambiguity::Escapes);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = Arc::try_unwrap(store).ok().unwrap();
        let facts = store.freeze(ClassIndex::default());
        let usage = facts.usage(&symbol).unwrap();
        assert_eq!(usage.sites, 8);
        assert_eq!(usage.count(CallKind::Begin), 4);
        assert_eq!(usage.count(CallKind::Commit), 4);
        assert!(usage.is_ambiguous(Ambiguity::Escapes));
    }

    #[test]
    fn same_field_name_in_two_classes_stays_apart() {
        let store = FactStore::new();
        let orders = Symbol::field("com.acme.Orders", "utx");
        let batch = Symbol::field("com.acme.Batch", "utx");
        for kind in [CallKind::Begin, CallKind::Commit, CallKind::Rollback] {
            store.record(&orders, Some(kind));
        }
        store.record(&batch, Some(CallKind::Begin));
        store.record(&batch, None);
        store.record_ambiguity(&batch, Ambiguity::Escapes);

        let facts = store.freeze(ClassIndex::default());
        assert_eq!(facts.usages().count(), 2);
        let orders = facts.usage(&orders).unwrap();
        let batch = facts.usage(&batch).unwrap();
        assert_eq!(orders.sites, 3);
        assert_eq!(orders.count(CallKind::Rollback), 1);
        assert!(!orders.is_ambiguous(Ambiguity::Escapes));
        assert_eq!(batch.sites, 2);
        assert_eq!(batch.count(CallKind::Rollback), 0);
        assert!(batch.is_ambiguous(Ambiguity::Escapes));
    }

    #[test]
    fn module_merge_is_a_union() {
        let store = FactStore::new();
        let root = PathBuf::from("orders");
        store.merge_module(
            &root,
            ModuleState {
                flavors: [TxFlavor::Jta].into_iter().collect(),
                packages: ["com.acme.orders.api".to_string()].into_iter().collect(),
                ..Default::default()
            },
        );
        store.merge_module(
            &root,
            ModuleState {
                flavors: [TxFlavor::Container].into_iter().collect(),
                packages: ["com.acme.orders.store".to_string()].into_iter().collect(),
                declared_keys: ["spring.jpa.show-sql".to_string()].into_iter().collect(),
                ..Default::default()
            },
        );

        let state = store.existence_check(&root);
        assert_eq!(state.flavors.len(), 2);
        assert_eq!(state.manager_flavors().len(), 1);
        assert_eq!(state.base_package().as_deref(), Some("com.acme.orders"));
        assert!(state.has_auto_configuration_keys());
    }

    #[test]
    fn call_kinds_depend_on_type() {
        assert_eq!(CallKind::from_method(TrackedType::UserTransaction, "setTransactionTimeout"), CallKind::SetTimeout);
        assert_eq!(CallKind::from_method(TrackedType::EntityTransaction, "isActive"), CallKind::Status);
        assert_eq!(CallKind::from_method(TrackedType::UserTransaction, "isActive"), CallKind::Other);
    }
}
