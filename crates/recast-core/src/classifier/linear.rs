//! The one shape that is rewritten automatically.
//!
//! ```java
//! utx.setTransactionTimeout(30);      // optional, before the try or first in it
//! try {
//!     utx.begin();
//!     work();
//!     utx.commit();
//!     return result;                  // optional
//! } catch (Exception e) {
//!     utx.rollback();                 // or guarded by isActive()/getStatus()
//!     throw e;
//! }
//! ```
//!
//! [`check`] either returns the plan the rewrite engine needs or the first
//! reason the method does not fit, which becomes the detail of an
//! "unclassified control flow" outcome.

use std::sync::Arc;

use crate::ast::{NodePath, SyntaxNode};
use crate::facts::{Ambiguity, CallKind, Facts, Reference, Role};
use crate::symbols::{compact_text, OwnerScope, Symbol, SymbolOrigin, TrackedType, TypeEvidence};

use super::duration::const_eval;
use super::Candidate;

/// Method annotations that already put the method under demarcation.
const METHOD_DEMARCATION: &[&str] = &["Transactional", "TransactionAttribute"];

/// Type annotations that put every method of the class under container or
/// Spring demarcation.
const TYPE_DEMARCATION: &[&str] = &[
    "Transactional",
    "TransactionAttribute",
    "TransactionManagement",
    "Stateless",
    "Stateful",
    "Singleton",
    "MessageDriven",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearPlan {
    pub symbol: Symbol,
    pub ty: TrackedType,
    /// Constant timeout, in seconds.
    pub timeout_seconds: Option<i64>,
    /// Exception types, as written, that must still trigger a rollback.
    pub rollback_for: Vec<String>,
    /// Index of the method body within the method node.
    pub body_index: usize,
    /// Body statements in front of the try that go away.
    pub prelude: Vec<usize>,
    pub try_index: usize,
    /// Statements of the try block that go away.
    pub managed: Vec<usize>,
    /// Catch clauses of the try, each with the index of its recovery
    /// statement inside the clause body.
    pub handlers: Vec<(usize, usize)>,
    /// Some handler throws a new exception instead of the caught one, so the
    /// try stays with only the recovery removed.
    pub keep_try: bool,
    /// Reference sites the rewrite removes.
    pub removed_sites: u32,
}

impl LinearPlan {
    /// Path of the try statement relative to the method node.
    pub fn try_path(&self) -> NodePath {
        vec![self.body_index, self.try_index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Declaration,
    Timeout(i64),
    Begin,
    Commit,
    Return,
    Work,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Setup,
    Work,
    Committed,
    Returned,
}

pub fn check(c: &Candidate<'_>, facts: &Facts) -> Result<LinearPlan, String> {
    eligibility(c, facts)?;
    let (symbol, ty) = single_source(c, facts)?;

    let body_index = c
        .node
        .child_index_by_field("body")
        .ok_or_else(|| "method has no body".to_string())?;
    let body = &c.node.children()[body_index];
    let statements = body.named_child_indices();

    if statements
        .iter()
        .any(|&i| body.children()[i].kind() == "try_with_resources_statement")
    {
        return Err("try-with-resources".to_string());
    }
    let tries: Vec<usize> = statements
        .iter()
        .copied()
        .filter(|&i| body.children()[i].kind() == "try_statement")
        .collect();
    let try_index = match tries.as_slice() {
        [single] => *single,
        [] => return Err("no guarded block".to_string()),
        _ => return Err("more than one try statement".to_string()),
    };
    if statements.last() != Some(&try_index) {
        return Err("statements after the guarded block".to_string());
    }

    let mut timeout = None;
    let mut prelude = Vec::new();
    let mut begun = false;
    let before_try: Vec<usize> = statements.iter().copied().take_while(|&i| i != try_index).collect();
    for (position, &index) in before_try.iter().enumerate() {
        let step = step_of(c, &symbol, &body.children()[index], &[body_index, index])?;
        match step {
            Step::Declaration => {}
            Step::Timeout(seconds) => set_timeout(&mut timeout, seconds)?,
            Step::Begin if position + 1 == before_try.len() => begun = true,
            Step::Begin => return Err("statements between begin and the guarded block".to_string()),
            _ => return Err("statements outside the guarded block".to_string()),
        }
        prelude.push(index);
    }

    let try_node = &body.children()[try_index];
    let try_path = vec![body_index, try_index];
    let managed = guarded_body(c, &symbol, try_node, &try_path, begun, &mut timeout)?;
    let recovery = handlers(c, try_node, &try_path)?;

    Ok(LinearPlan {
        symbol,
        ty,
        timeout_seconds: timeout,
        rollback_for: recovery.rollback_for,
        body_index,
        prelude,
        try_index,
        managed,
        handlers: recovery.handlers,
        keep_try: recovery.keep_try,
        removed_sites: c.references.len() as u32,
    })
}

fn eligibility(c: &Candidate<'_>, facts: &Facts) -> Result<(), String> {
    let method = c.method;
    if method.is_constructor {
        return Err("constructor".to_string());
    }
    for keyword in ["static", "private", "final"] {
        if method.has_modifier(keyword) {
            return Err(format!("{keyword} method cannot be proxied"));
        }
    }
    if method.class_kind != "class_declaration" {
        return Err("enclosing type cannot be proxied".to_string());
    }
    if method.class_final {
        return Err("final class cannot be proxied".to_string());
    }
    if let Some(existing) = METHOD_DEMARCATION.iter().find(|a| method.has_annotation(a)) {
        return Err(format!("already demarcated by @{existing}"));
    }
    let class_annotations = facts
        .classes()
        .get(&method.class)
        .map(|class| class.annotations.as_slice())
        .unwrap_or_default();
    if let Some(existing) = TYPE_DEMARCATION.iter().find(|a| class_annotations.iter().any(|c| c == *a)) {
        return Err(format!("class already demarcated by @{existing}"));
    }
    if facts.classes().is_self_invoked(&method.class, &method.name) {
        return Err("self-invoked method bypasses the proxy".to_string());
    }
    Ok(())
}

fn single_source(c: &Candidate<'_>, facts: &Facts) -> Result<(Symbol, TrackedType), String> {
    let first = c
        .references
        .first()
        .ok_or_else(|| "no transaction references".to_string())?;
    if c.references.iter().any(|r| r.symbol() != first.symbol()) {
        return Err("more than one transaction source".to_string());
    }
    if c.references.iter().any(|r| r.deferred.is_some()) {
        return Err("transaction used inside a deferred body".to_string());
    }
    if c.references.iter().any(|r| !supported_role(r)) {
        return Err("unsupported use of the transaction".to_string());
    }
    let resolved = &first.resolved;
    if resolved.evidence == TypeEvidence::NameOnly {
        return Err("transaction type is not confirmed by an import".to_string());
    }
    match resolved.origin {
        SymbolOrigin::Parameter => return Err("transaction supplied by the caller".to_string()),
        SymbolOrigin::Local if resolved.symbol.is_derived() => {
            return Err("application-managed entity manager".to_string())
        }
        _ => {}
    }
    if let Some(usage) = facts.usage(&resolved.symbol) {
        if usage.is_ambiguous(Ambiguity::Escapes) {
            return Err("transaction escapes its owner".to_string());
        }
        if usage.is_ambiguous(Ambiguity::Reassigned) {
            return Err("transaction is reassigned".to_string());
        }
    }
    Ok((resolved.symbol.clone(), resolved.ty))
}

fn supported_role(reference: &Reference) -> bool {
    matches!(
        reference.role,
        Role::Alias
            | Role::Call(
                CallKind::Begin | CallKind::Commit | CallKind::Rollback | CallKind::SetTimeout | CallKind::Status
            )
    )
}

fn set_timeout(timeout: &mut Option<i64>, seconds: i64) -> Result<(), String> {
    if timeout.replace(seconds).is_some() {
        return Err("timeout set more than once".to_string());
    }
    Ok(())
}

/// Walk the try block and return the indices of the statements the
/// annotation takes over.
fn guarded_body(
    c: &Candidate<'_>,
    symbol: &Symbol,
    try_node: &Arc<SyntaxNode>,
    try_path: &[usize],
    begun: bool,
    timeout: &mut Option<i64>,
) -> Result<Vec<usize>, String> {
    let block_index = try_node
        .child_index_by_field("body")
        .ok_or_else(|| "guarded block has no body".to_string())?;
    let block = &try_node.children()[block_index];
    let mut phase = if begun { Phase::Work } else { Phase::Setup };
    let mut managed = Vec::new();

    for index in block.named_child_indices() {
        let mut path = try_path.to_vec();
        path.extend([block_index, index]);
        let step = step_of(c, symbol, &block.children()[index], &path)?;
        phase = match (phase, step) {
            (Phase::Setup, Step::Declaration) => Phase::Setup,
            (Phase::Setup, Step::Timeout(seconds)) => {
                set_timeout(timeout, seconds)?;
                Phase::Setup
            }
            (Phase::Setup, Step::Begin) => Phase::Work,
            (Phase::Setup, _) => return Err("work before begin".to_string()),
            (Phase::Work, Step::Work) if exits_early(&block.children()[index], Jumps::default()) => {
                return Err("early exit before commit".to_string())
            }
            (Phase::Work, Step::Work) => Phase::Work,
            (Phase::Work, Step::Commit) => Phase::Committed,
            (Phase::Work, _) => return Err("transaction managed in the middle of the work".to_string()),
            (Phase::Committed, Step::Return) => Phase::Returned,
            (Phase::Committed, _) | (Phase::Returned, _) => return Err("statements after commit".to_string()),
        };
        if !matches!(step, Step::Work | Step::Return) {
            managed.push(index);
        }
    }
    match phase {
        Phase::Committed | Phase::Returned => Ok(managed),
        Phase::Setup => Err("begin is not inside the guarded block".to_string()),
        Phase::Work => Err("commit is not the last action".to_string()),
    }
}

/// Jump targets enclosing a node inside the statement being checked.
#[derive(Debug, Clone, Copy, Default)]
struct Jumps {
    in_loop: bool,
    in_switch: bool,
}

/// Whether `node` holds a jump that leaves the statement before it
/// completes. Lambda bodies and class bodies are separate frames.
fn exits_early(node: &SyntaxNode, jumps: Jumps) -> bool {
    match node.kind() {
        "lambda_expression" | "class_body" => false,
        "return_statement" => true,
        // a labeled jump may target a statement outside the block
        "break_statement" => node.named_children().next().is_some() || !(jumps.in_loop || jumps.in_switch),
        "continue_statement" => node.named_children().next().is_some() || !jumps.in_loop,
        "yield_statement" => !jumps.in_switch,
        kind => {
            let inner = Jumps {
                in_loop: jumps.in_loop
                    || matches!(kind, "for_statement" | "enhanced_for_statement" | "while_statement" | "do_statement"),
                in_switch: jumps.in_switch || matches!(kind, "switch_expression" | "switch_statement"),
            };
            node.children().iter().any(|child| exits_early(child, inner))
        }
    }
}

fn step_of(c: &Candidate<'_>, symbol: &Symbol, node: &Arc<SyntaxNode>, path: &[usize]) -> Result<Step, String> {
    let refs = c.references_at(path);
    match node.kind() {
        "local_variable_declaration" => {
            let declarators: Vec<_> = node.children_by_field("declarator").collect();
            let declares_symbol = declarators.len() == 1
                && matches!(symbol.owner, OwnerScope::Method { .. })
                && !symbol.is_derived()
                && declarators[0].child_by_field("name").map(|n| n.text()) == Some(symbol.name.as_str());
            if !refs.is_empty() && refs.iter().all(|r| r.role == Role::Alias) && declarators.len() == 1 {
                Ok(Step::Declaration)
            } else if refs.is_empty() && declares_symbol {
                Ok(Step::Declaration)
            } else if refs.is_empty() {
                Ok(Step::Work)
            } else {
                Err("transaction used in a declaration".to_string())
            }
        }
        "expression_statement" if !refs.is_empty() => {
            let [reference] = refs.as_slice() else {
                return Err("several transaction uses in one statement".to_string());
            };
            let expression = node
                .named_child_indices()
                .first()
                .copied()
                .ok_or_else(|| "empty statement".to_string())?;
            let mut expression_path = path.to_vec();
            expression_path.push(expression);
            let direct = reference.call_path.as_deref().map(|p| c.relative(p)) == Some(expression_path);
            if !direct {
                return Err("transaction call inside a larger expression".to_string());
            }
            match reference.call_kind() {
                Some(CallKind::Begin) => Ok(Step::Begin),
                Some(CallKind::Commit) => Ok(Step::Commit),
                Some(CallKind::SetTimeout) => timeout_seconds(&node.children()[expression]).map(Step::Timeout),
                _ => Err("unexpected transaction call in the guarded block".to_string()),
            }
        }
        "return_statement" if refs.is_empty() => Ok(Step::Return),
        _ if refs.is_empty() => Ok(Step::Work),
        _ => Err("transaction used inside nested control flow".to_string()),
    }
}

fn timeout_seconds(invocation: &SyntaxNode) -> Result<i64, String> {
    let arguments: Vec<_> = invocation
        .child_by_field("arguments")
        .map(|a| a.named_children().collect())
        .unwrap_or_default();
    let [argument] = arguments.as_slice() else {
        return Err("malformed timeout call".to_string());
    };
    match const_eval(argument) {
        Ok(Some(seconds)) if (0..=i64::from(i32::MAX)).contains(&seconds) => Ok(seconds),
        Ok(Some(_)) => Err("timeout out of range".to_string()),
        Ok(None) => Err("non-constant transaction timeout".to_string()),
        Err(e) => Err(format!("timeout does not evaluate ({e})")),
    }
}

/// What the catch clauses of the guarded block amount to.
#[derive(Debug)]
struct Recovery {
    rollback_for: Vec<String>,
    handlers: Vec<(usize, usize)>,
    keep_try: bool,
}

/// One catch clause that rolls back and then throws.
#[derive(Debug)]
struct Handler {
    recovery: usize,
    /// Exception types leaving the handler.
    thrown: Vec<String>,
    translates: bool,
}

/// Check every catch clause and collect the rollback rules they imply.
fn handlers(c: &Candidate<'_>, try_node: &Arc<SyntaxNode>, try_path: &[usize]) -> Result<Recovery, String> {
    if try_node.child_of_kind("finally_clause").is_some() {
        return Err("finally block".to_string());
    }
    let mut thrown: Vec<String> = Vec::new();
    let mut handlers = Vec::new();
    let mut keep_try = false;
    for (index, clause) in try_node.children().iter().enumerate() {
        if clause.kind() != "catch_clause" {
            continue;
        }
        let mut path = try_path.to_vec();
        path.push(index);
        let handler = recovering_handler(c, clause, &path)?;
        for ty in handler.thrown {
            if !thrown.contains(&ty) {
                thrown.push(ty);
            }
        }
        keep_try |= handler.translates;
        handlers.push((index, handler.recovery));
    }
    if handlers.is_empty() {
        return Err("no failure handler".to_string());
    }
    let rollback_for = if thrown.iter().any(|t| matches!(last_segment(t), "Throwable" | "Error")) {
        vec!["Throwable".to_string()]
    } else {
        thrown.into_iter().filter(|t| last_segment(t) != "RuntimeException").collect()
    };
    Ok(Recovery { rollback_for, handlers, keep_try })
}

/// `catch (T e) { <recovery> throw <exception>; }`
fn recovering_handler(c: &Candidate<'_>, clause: &SyntaxNode, path: &[usize]) -> Result<Handler, String> {
    let parameter = clause
        .child_of_kind("catch_formal_parameter")
        .ok_or_else(|| "malformed handler".to_string())?;
    let name = parameter.child_by_field("name").map(|n| n.text()).unwrap_or_default();
    let types: Vec<String> = parameter
        .child_of_kind("catch_type")
        .map(|t| t.named_children().map(|ty| compact_text(ty)).collect())
        .unwrap_or_default();

    let body_index = clause
        .child_index_by_field("body")
        .ok_or_else(|| "malformed handler".to_string())?;
    let body = &clause.children()[body_index];
    let statements = body.named_child_indices();
    let Some((recovery, rest)) = statements.split_first() else {
        return Err("handler does not roll back".to_string());
    };

    let mut recovery_path = path.to_vec();
    recovery_path.extend([body_index, *recovery]);
    if !is_recovery(c, &body.children()[*recovery], &recovery_path) {
        return Err("handler does not roll back".to_string());
    }
    let rethrow = match rest {
        [] => return Err("handler does not rethrow".to_string()),
        [rethrow] => *rethrow,
        _ => return Err("handler does more than roll back and rethrow".to_string()),
    };
    let statement = &body.children()[rethrow];
    if statement.kind() != "throw_statement" {
        return Err("handler does not rethrow".to_string());
    }
    let mut rethrow_path = path.to_vec();
    rethrow_path.extend([body_index, rethrow]);
    if !c.references_at(&rethrow_path).is_empty() {
        return Err("transaction used in the rethrown exception".to_string());
    }

    let exception = statement
        .named_children()
        .next()
        .ok_or_else(|| "handler does not rethrow".to_string())?;
    if exception.kind() == "identifier" && exception.text() == name {
        return Ok(Handler { recovery: *recovery, thrown: types, translates: false });
    }
    // the thrown type is only known for `new T(..)`
    let created = (exception.kind() == "object_creation_expression")
        .then(|| exception.child_by_field("type"))
        .flatten()
        .map(|ty| compact_text(ty).split('<').next().unwrap_or_default().to_string())
        .filter(|ty| !ty.is_empty());
    Ok(Handler {
        recovery: *recovery,
        thrown: vec![created.unwrap_or_else(|| "Throwable".to_string())],
        translates: true,
    })
}

fn is_recovery(c: &Candidate<'_>, node: &Arc<SyntaxNode>, path: &[usize]) -> bool {
    match node.kind() {
        "expression_statement" => is_rollback_statement(c, node, path),
        "block" => {
            let statements = node.named_child_indices();
            let [only] = statements.as_slice() else {
                return false;
            };
            let mut inner = path.to_vec();
            inner.push(*only);
            is_recovery(c, &node.children()[*only], &inner)
        }
        "if_statement" => {
            if node.child_by_field("alternative").is_some() {
                return false;
            }
            let (Some(condition), Some(consequence)) = (
                node.child_index_by_field("condition"),
                node.child_index_by_field("consequence"),
            ) else {
                return false;
            };
            let mut condition_path = path.to_vec();
            condition_path.push(condition);
            let probes = c.references_at(&condition_path);
            let mut consequence_path = path.to_vec();
            consequence_path.push(consequence);
            !probes.is_empty()
                && probes.iter().all(|r| r.call_kind() == Some(CallKind::Status))
                && is_recovery(c, &node.children()[consequence], &consequence_path)
        }
        "try_statement" => {
            let Some(body) = node.child_index_by_field("body") else {
                return false;
            };
            let mut body_path = path.to_vec();
            body_path.push(body);
            let inside = c.references_at(&body_path).len();
            inside == c.references_at(path).len() && is_recovery(c, &node.children()[body], &body_path)
        }
        _ => false,
    }
}

fn is_rollback_statement(c: &Candidate<'_>, node: &SyntaxNode, path: &[usize]) -> bool {
    let refs = c.references_at(path);
    let [reference] = refs.as_slice() else {
        return false;
    };
    let Some(expression) = node.named_child_indices().first().copied() else {
        return false;
    };
    let mut expression_path = path.to_vec();
    expression_path.push(expression);
    reference.call_kind() == Some(CallKind::Rollback)
        && reference.call_path.as_deref().map(|p| c.relative(p)) == Some(expression_path)
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
