/*!
# Pattern Classification

Decides, for every demarcation candidate, whether it is safe to rewrite
automatically (LINEAR) or has to be handed to a human (COMPLEX).

Programmatic candidates go through an ordered, fail-fast rule chain:

1. any transaction call inside a loop
2. more than one `begin` or more than one `commit` on one symbol
3. more than one symbol contributing calls to one guarded region
4. the linear shape (see [`linear`])
5. begin and commit present without recovery in any failure handler
6. everything else

The first rule that applies decides the outcome, so "multiple sources" always
wins over "missing recovery" whatever the order of the statements.
*/

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::ast::{node_at, NodePath, SyntaxNode, ToSource};
use crate::facts::{CallKind, Facts, MethodInfo, Reference, Region, UnitScan};
use crate::symbols::Symbol;

pub mod attributes;
pub mod duration;
pub mod linear;

pub use attributes::{classify_attributes, AttributePlan, AttributeTarget};
pub use duration::{convert, const_eval, DurationValue, TimeUnit};
pub use linear::LinearPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    Linear,
    Complex,
}

/// The rule that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Rule {
    RepeatedInLoop,
    MultipleGuardedBlocks,
    MultipleSources,
    LinearDemarcation,
    MissingRecovery,
    Unclassified,
    DeclarativeAttributes,
    UnsupportedAttributes,
}

impl Rule {
    pub fn label(self) -> &'static str {
        match self {
            Rule::RepeatedInLoop => "repeated-in-loop",
            Rule::MultipleGuardedBlocks => "multiple-guarded-blocks",
            Rule::MultipleSources => "multiple-sources",
            Rule::LinearDemarcation => "linear-demarcation",
            Rule::MissingRecovery => "missing-recovery",
            Rule::Unclassified => "unclassified",
            Rule::DeclarativeAttributes => "declarative-attributes",
            Rule::UnsupportedAttributes => "unsupported-attributes",
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Rule::RepeatedInLoop => "repeated use inside a loop",
            Rule::MultipleGuardedBlocks => "multiple guarded blocks",
            Rule::MultipleSources => "multiple sources",
            Rule::LinearDemarcation => "single guarded block",
            Rule::MissingRecovery => "missing recovery handling",
            Rule::Unclassified => "unclassified control flow",
            Rule::DeclarativeAttributes => "literal transaction attributes",
            Rule::UnsupportedAttributes => "unsupported transaction attributes",
        }
    }

    pub fn suggestion(self) -> &'static str {
        match self {
            Rule::RepeatedInLoop => {
                "Move the transaction boundary outside the loop, or demarcate a per-item service method with @Transactional(propagation = Propagation.REQUIRES_NEW)"
            }
            Rule::MultipleGuardedBlocks => "Split each guarded block into its own @Transactional service method",
            Rule::MultipleSources => "Use a single transaction manager per method, or split the work across services",
            Rule::LinearDemarcation | Rule::DeclarativeAttributes => "",
            Rule::MissingRecovery => {
                "Add rollback handling, or confirm that the default @Transactional rollback rules match the intended behavior"
            }
            Rule::Unclassified => "Migrate by hand to @Transactional or TransactionTemplate",
            Rule::UnsupportedAttributes => "Map the container-managed attributes to @Transactional by hand",
        }
    }
}

/// Data a LINEAR outcome hands to the rewrite engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedParameters {
    None,
    Programmatic(LinearPlan),
    Attributes(AttributePlan),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationOutcome {
    pub category: Category,
    pub rule: Rule,
    pub reason: String,
    /// Offending construct, relative to the candidate node.
    pub focus: NodePath,
    /// Verbatim source of the focus node.
    pub original: String,
    pub params: ExtractedParameters,
}

impl ClassificationOutcome {
    pub fn complex(node: &Arc<SyntaxNode>, rule: Rule, reason: impl Into<String>, focus: NodePath) -> Self {
        Self {
            category: Category::Complex,
            rule,
            reason: reason.into(),
            original: original_text(node, &focus),
            focus,
            params: ExtractedParameters::None,
        }
    }

    pub fn linear(node: &Arc<SyntaxNode>, rule: Rule, focus: NodePath, params: ExtractedParameters) -> Self {
        Self {
            category: Category::Linear,
            rule,
            reason: rule.reason().to_string(),
            original: original_text(node, &focus),
            focus,
            params,
        }
    }

    pub fn is_linear(&self) -> bool {
        self.category == Category::Linear
    }
}

fn original_text(node: &Arc<SyntaxNode>, focus: &[usize]) -> String {
    node_at(node, focus)
        .map(|n| n.to_source().trim().to_string())
        .unwrap_or_default()
}

/// A method containing at least one transaction call, with its references.
pub struct Candidate<'a> {
    pub node: &'a Arc<SyntaxNode>,
    pub method: &'a MethodInfo,
    pub references: Vec<&'a Reference>,
}

impl<'a> Candidate<'a> {
    pub fn new(node: &'a Arc<SyntaxNode>, method: &'a MethodInfo, scan: &'a UnitScan) -> Self {
        let references = scan
            .references_in(&method.path)
            .filter(|r| r.method.as_deref() == Some(method.path.as_slice()))
            .collect();
        Self {
            node,
            method,
            references,
        }
    }

    /// Whether the method holds any transaction call at all.
    pub fn has_calls(&self) -> bool {
        self.references.iter().any(|r| r.call_kind().is_some())
    }

    /// Path of an absolute location relative to the method node.
    pub fn relative(&self, path: &[usize]) -> NodePath {
        path.get(self.method.path.len()..).unwrap_or_default().to_vec()
    }

    /// References at or below a location given relative to the method node.
    pub fn references_at(&self, relative: &[usize]) -> Vec<&'a Reference> {
        let base = self.method.path.len();
        self.references
            .iter()
            .copied()
            .filter(|r| r.path.get(base..).map(|p| p.starts_with(relative)).unwrap_or(false))
            .collect()
    }

    fn calls(&self) -> impl Iterator<Item = (&'a Reference, CallKind)> + '_ {
        self.references.iter().filter_map(|r| r.call_kind().map(|kind| (*r, kind)))
    }
}

type RuleFn = fn(&Candidate<'_>, &Facts) -> Option<ClassificationOutcome>;

/// Rule chain in precedence order.
const CHAIN: [RuleFn; 5] = [
    repeated_in_loop,
    multiple_guarded_blocks,
    multiple_sources,
    linear_demarcation,
    missing_recovery,
];

/// Classify a programmatic demarcation candidate. Total: every candidate gets
/// exactly one outcome.
pub fn classify(candidate: &Candidate<'_>, facts: &Facts) -> ClassificationOutcome {
    CHAIN
        .iter()
        .find_map(|rule| rule(candidate, facts))
        .unwrap_or_else(|| unclassified(candidate, facts))
}

fn repeated_in_loop(c: &Candidate<'_>, _facts: &Facts) -> Option<ClassificationOutcome> {
    let (reference, _) = c.calls().find(|(r, _)| r.loop_path.is_some())?;
    let focus = c.relative(reference.loop_path.as_deref()?);
    Some(ClassificationOutcome::complex(
        c.node,
        Rule::RepeatedInLoop,
        Rule::RepeatedInLoop.reason(),
        focus,
    ))
}

fn multiple_guarded_blocks(c: &Candidate<'_>, _facts: &Facts) -> Option<ClassificationOutcome> {
    for kind in [CallKind::Begin, CallKind::Commit] {
        let mut seen = BTreeSet::new();
        let second = c
            .calls()
            .filter(|(_, k)| *k == kind)
            .map(|(r, _)| r)
            .find(|r| !seen.insert(r.symbol()));
        if let Some(second) = second {
            let focus = c.relative(second.statement.as_deref().unwrap_or(&second.path));
            return Some(ClassificationOutcome::complex(
                c.node,
                Rule::MultipleGuardedBlocks,
                Rule::MultipleGuardedBlocks.reason(),
                focus,
            ));
        }
    }
    None
}

fn multiple_sources(c: &Candidate<'_>, _facts: &Facts) -> Option<ClassificationOutcome> {
    // region key: innermost try and the part of it, or the method body
    let mut regions: BTreeMap<Option<(NodePath, Region)>, Vec<&Reference>> = BTreeMap::new();
    for (reference, _) in c.calls() {
        let key = reference.region().map(|g| (g.try_path.clone(), g.region));
        regions.entry(key).or_default().push(reference);
    }
    for (key, references) in regions {
        let symbols: BTreeSet<&Symbol> = references.iter().map(|r| r.symbol()).collect();
        if symbols.len() < 2 {
            continue;
        }
        let focus = match key {
            Some((try_path, _)) => c.relative(&try_path),
            None => {
                let first = references[0].symbol();
                let other = references.iter().find(|r| r.symbol() != first)?;
                c.relative(other.statement.as_deref().unwrap_or(&other.path))
            }
        };
        return Some(ClassificationOutcome::complex(
            c.node,
            Rule::MultipleSources,
            Rule::MultipleSources.reason(),
            focus,
        ));
    }
    None
}

fn linear_demarcation(c: &Candidate<'_>, facts: &Facts) -> Option<ClassificationOutcome> {
    let plan = linear::check(c, facts).ok()?;
    let focus = plan.try_path();
    Some(ClassificationOutcome::linear(
        c.node,
        Rule::LinearDemarcation,
        focus,
        ExtractedParameters::Programmatic(plan),
    ))
}

fn missing_recovery(c: &Candidate<'_>, _facts: &Facts) -> Option<ClassificationOutcome> {
    let (begin, _) = c.calls().find(|(_, k)| *k == CallKind::Begin)?;
    c.calls().find(|(_, k)| *k == CallKind::Commit)?;
    let recovered = c.calls().any(|(r, k)| {
        k == CallKind::Rollback
            && r.symbol() == begin.symbol()
            && r.guards.iter().any(|g| matches!(g.region, Region::Handler(_) | Region::Finally))
    });
    if recovered {
        return None;
    }
    let focus = match begin.region() {
        Some(guard) => c.relative(&guard.try_path),
        None => c.relative(begin.statement.as_deref().unwrap_or(&begin.path)),
    };
    Some(ClassificationOutcome::complex(
        c.node,
        Rule::MissingRecovery,
        Rule::MissingRecovery.reason(),
        focus,
    ))
}

fn unclassified(c: &Candidate<'_>, facts: &Facts) -> ClassificationOutcome {
    let detail = match linear::check(c, facts) {
        Err(detail) => detail,
        Ok(_) => "no applicable rule".to_string(),
    };
    let focus = c
        .calls()
        .next()
        .and_then(|(r, _)| r.statement.as_deref())
        .map(|s| c.relative(s))
        .unwrap_or_default();
    ClassificationOutcome::complex(
        c.node,
        Rule::Unclassified,
        format!("{} ({detail})", Rule::Unclassified.reason()),
        focus,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{index_unit, scan_unit, FactStore};
    use crate::parser::{JavaParser, Parser};
    use std::path::Path;

    pub(crate) const HEADER: &str = "package com.acme;\n\
        import javax.transaction.UserTransaction;\n\
        import javax.persistence.EntityManager;\n\
        import javax.persistence.EntityTransaction;\n";

    /// Classify the single candidate method named `method` in `body`.
    pub(crate) fn classify_method(body: &str, method: &str) -> ClassificationOutcome {
        classify_source(&format!("{HEADER}public class Service {{\n{body}\n}}\n"), method)
    }

    /// Classify the method named `method` in a complete unit.
    pub(crate) fn classify_source(source: &str, method: &str) -> ClassificationOutcome {
        let mut parser = JavaParser::new().unwrap();
        let tree = parser.parse(source).unwrap();
        let unit = index_unit(&tree, Path::new("Service.java"));
        let store = FactStore::new();
        for class in unit.classes {
            store.record_class(class);
        }
        let index = store.class_index();
        let scan = scan_unit(&tree, &unit.imports, &index);
        for reference in &scan.references {
            store.record(reference.symbol(), reference.call_kind());
        }
        let facts = store.freeze(index);
        let info = scan.methods.iter().find(|m| m.name == method).unwrap();
        let node = node_at(&tree, &info.path).unwrap().clone();
        let candidate = Candidate::new(&node, info, &scan);
        classify(&candidate, &facts)
    }

    const LINEAR: &str = "
    private UserTransaction utx;

    public void place(String order) throws Exception {
        try {
            utx.begin();
            save(order);
            utx.commit();
        } catch (Exception e) {
            utx.rollback();
            throw e;
        }
    }";

    #[test]
    fn canonical_shape_is_linear() {
        let outcome = classify_method(LINEAR, "place");
        assert_eq!(outcome.category, Category::Linear);
        assert_eq!(outcome.rule, Rule::LinearDemarcation);
        assert!(outcome.original.starts_with("try {"));
    }

    #[test]
    fn every_loop_kind_is_complex() {
        let loops = [
            "for (int i = 0; i < 3; i++) { utx.begin(); utx.commit(); }",
            "for (String s : items) { utx.begin(); utx.commit(); }",
            "while (more()) { utx.begin(); utx.commit(); }",
            "do { utx.begin(); utx.commit(); } while (more());",
            "items.forEach(s -> { try { utx.begin(); utx.commit(); } catch (Exception e) { } });",
        ];
        for body in loops {
            let source = format!(
                "private UserTransaction utx;\n    public void run(java.util.List<String> items) throws Exception {{ {body} }}"
            );
            let outcome = classify_method(&source, "run");
            assert_eq!(outcome.rule, Rule::RepeatedInLoop, "{body}");
            assert_eq!(outcome.reason, "repeated use inside a loop");
        }
    }

    #[test]
    fn missing_rollback_is_reported() {
        let outcome = classify_method(
            "private UserTransaction utx;
    public void run() throws Exception {
        try {
            utx.begin();
            work();
            utx.commit();
        } catch (Exception e) {
            log(e);
        }
    }",
            "run",
        );
        assert_eq!(outcome.rule, Rule::MissingRecovery);
        assert!(outcome.original.starts_with("try {"));
    }

    #[test]
    fn second_begin_is_the_focus() {
        let outcome = classify_method(
            "private UserTransaction utx;
    public void run() throws Exception {
        utx.begin();
        utx.commit();
        utx.begin();
        utx.commit();
    }",
            "run",
        );
        assert_eq!(outcome.rule, Rule::MultipleGuardedBlocks);
        assert_eq!(outcome.original, "utx.begin();");
    }

    #[test]
    fn multiple_sources_beats_missing_recovery_in_every_order() {
        let statements = ["utx.begin();", "other.begin();", "utx.commit();", "other.commit();"];
        let orders = [[0, 1, 2, 3], [1, 0, 3, 2], [0, 2, 1, 3], [1, 3, 0, 2], [3, 2, 1, 0]];
        for order in orders {
            let body: Vec<&str> = order.iter().map(|&i| statements[i]).collect();
            let source = format!(
                "private UserTransaction utx;\n    private UserTransaction other;\n    \
                 public void run() throws Exception {{ try {{ {} }} catch (Exception e) {{ throw e; }} }}",
                body.join(" ")
            );
            let outcome = classify_method(&source, "run");
            assert_eq!(outcome.rule, Rule::MultipleSources, "{order:?}");
        }
    }

    #[test]
    fn ineligible_methods_are_unclassified_with_detail() {
        let source = LINEAR.replace("public void place", "private void place");
        let outcome = classify_method(&source, "place");
        assert_eq!(outcome.rule, Rule::Unclassified);
        assert_eq!(outcome.reason, "unclassified control flow (private method cannot be proxied)");
    }

    #[test]
    fn resource_local_transactions_are_linear() {
        let outcome = classify_method(
            "private EntityManager em;
    public void run() {
        EntityTransaction tx = em.getTransaction();
        try {
            tx.begin();
            em.persist(new Object());
            tx.commit();
        } catch (RuntimeException e) {
            if (tx.isActive()) {
                tx.rollback();
            }
            throw e;
        }
    }",
            "run",
        );
        assert_eq!(outcome.category, Category::Linear);
        match outcome.params {
            ExtractedParameters::Programmatic(plan) => {
                assert!(plan.rollback_for.is_empty());
                assert_eq!(plan.prelude.len(), 1);
            }
            other => panic!("unexpected parameters {other:?}"),
        }
    }
}
