/*!
# Pipeline - Two-Phase Migration Engine

Parses, scans, classifies, rewrites and cleans a batch of units. Every
parallel step runs on a per-run rayon pool; the joins between steps are the
barriers the fact accumulation relies on.
*/

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::ast::{node_at, replace_at, SyntaxNode, ToSource};
use crate::classifier::ExtractedParameters;
use crate::errors::{PipelineError, RewriteError};
use crate::facts::{Ambiguity, ClassIndex, FactStore, Facts, ModuleState, Role, TxFlavor, UnitScan};
use crate::module_config::{
    is_application_properties, properties_keys, DeclaredStrategy, LayoutProvider, ModuleConfigProvider,
    SourceClassification,
};
use crate::parser::{JavaParser, Parser};
use crate::recipes::{builtin_recipes, config::build_config_unit};
use crate::rewrite::{cleanup, ImportEdits, RewriteEngine};
use crate::symbols::{ImportTable, OwnerScope, Symbol, TypeEvidence};
use crate::RecastConfig;

use super::recipe::{PlannedEdit, Recipe, RecipeStats};
use super::report::{Change, OutcomeRecord, RunReport, UnitOutput, UnitReport};
use super::state::{UnitRecord, UnitState};
use super::{ScannedUnit, SourceInput};

/// In-memory migration engine
pub struct Pipeline {
    recipes: Vec<Box<dyn Recipe>>,
    stats: HashMap<String, RecipeStats>,
    config: RecastConfig,
    provider: Arc<dyn ModuleConfigProvider>,
    engine: RewriteEngine,
}

/// A Java unit travelling through the run.
struct Unit {
    input: SourceInput,
    classification: SourceClassification,
    record: UnitRecord,
    tree: Option<Arc<SyntaxNode>>,
    imports: Option<Arc<ImportTable>>,
    scan: Option<UnitScan>,
    planned: Vec<PlannedEdit>,
    outcomes: Vec<OutcomeRecord>,
    import_edits: ImportEdits,
    /// Reference sites removed by applied rewrites, per symbol.
    removed: BTreeMap<Symbol, u32>,
    linear_applied: usize,
    stats: HashMap<&'static str, RecipeStats>,
}

impl Unit {
    fn new(input: SourceInput, classification: SourceClassification) -> Self {
        Self {
            record: UnitRecord::new(input.path.clone()),
            input,
            classification,
            tree: None,
            imports: None,
            scan: None,
            planned: Vec::new(),
            outcomes: Vec::new(),
            import_edits: ImportEdits::default(),
            removed: BTreeMap::new(),
            linear_applied: 0,
            stats: HashMap::new(),
        }
    }

    fn path(&self) -> &Path {
        &self.input.path
    }

    fn failed(&self) -> bool {
        self.record.state == UnitState::Failed
    }

    /// Whether the unit may be rewritten or marked at all.
    fn editable(&self, include_tests: bool) -> bool {
        (self.classification.is_main_source || include_tests)
            && self.classification.declared_strategy != DeclaredStrategy::Skip
    }

    /// Whether the unit's declarations count towards module facts.
    fn contributes(&self, include_tests: bool) -> bool {
        !self.classification.is_test_source || include_tests
    }

    fn stats_for(&mut self, recipe: &'static str) -> &mut RecipeStats {
        self.stats
            .entry(recipe)
            .or_insert_with(|| RecipeStats::new(recipe.to_string()))
    }

    fn fail(&mut self, error: impl std::fmt::Display) {
        warn!(path = %self.input.path.display(), "{error}");
        self.record.fail(error);
        self.tree = None;
        self.import_edits = ImportEdits::default();
        self.removed.clear();
        self.linear_applied = 0;
        for outcome in &mut self.outcomes {
            outcome.applied = false;
        }
    }
}

fn is_java(path: &Path) -> bool {
    path.extension().map(|e| e == "java").unwrap_or(false)
}

fn panic_message(path: &Path, payload: Box<dyn std::any::Any + Send>) -> PipelineError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    PipelineError::Panicked {
        path: path.display().to_string(),
        message,
    }
}

impl Pipeline {
    pub fn new(config: RecastConfig) -> Self {
        let provider = LayoutProvider::new().with_strategies(config.strategies.clone());
        Self {
            recipes: Vec::new(),
            stats: HashMap::new(),
            engine: RewriteEngine::new(config.marker_annotation.clone()),
            provider: Arc::new(provider),
            config,
        }
    }

    /// Pipeline with the built-in recipes the configuration selects.
    pub fn builtin(config: RecastConfig) -> Self {
        let recipes = builtin_recipes(&config.recipes);
        let mut pipeline = Self::new(config);
        for recipe in recipes {
            pipeline.add_recipe(recipe);
        }
        pipeline.sort_recipes_by_priority();
        pipeline
    }

    /// Add a recipe
    pub fn add_recipe(&mut self, recipe: Box<dyn Recipe>) {
        let recipe_name = recipe.name().to_string();
        self.stats.insert(recipe_name, RecipeStats::new(recipe.name().to_string()));
        self.recipes.push(recipe);
    }

    /// Sort recipes by priority (higher priority first)
    pub fn sort_recipes_by_priority(&mut self) {
        self.recipes.sort_by_key(|recipe| std::cmp::Reverse(recipe.priority()));
    }

    /// Registered recipes, in the order they run
    pub fn recipes(&self) -> impl Iterator<Item = &dyn Recipe> {
        self.recipes.iter().map(|r| r.as_ref())
    }

    pub fn config(&self) -> &RecastConfig {
        &self.config
    }

    /// Get recipe statistics accumulated over every run
    pub fn stats(&self) -> &HashMap<String, RecipeStats> {
        &self.stats
    }

    /// Run the whole batch. Failures of single units are reported in the
    /// result; only a pool that cannot be built fails the run.
    pub fn run(&mut self, inputs: Vec<SourceInput>) -> Result<RunReport, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs)
            .build()
            .map_err(|e| PipelineError::Pool(e.to_string()))?;
        info!(inputs = inputs.len(), recipes = self.recipes.len(), "starting run");

        let store = FactStore::new();
        let input_paths: HashSet<PathBuf> = inputs.iter().map(|i| i.path.clone()).collect();
        let mut order = Vec::with_capacity(inputs.len());
        let mut units = Vec::new();
        let mut passthrough = Vec::new();
        for input in inputs {
            order.push(input.path.clone());
            let classification = self.provider.classify(&input.path);
            if is_java(&input.path) {
                units.push(Unit::new(input, classification));
                continue;
            }
            // test resources only count when test sources take part
            if is_application_properties(&input.path)
                && (classification.is_main_source || self.config.include_tests)
            {
                let module = ModuleState {
                    declared_keys: properties_keys(&input.text),
                    ..Default::default()
                };
                store.merge_module(&classification.module_root, module);
            }
            passthrough.push(input);
        }

        pool.install(|| self.declaration_sweep(&mut units, &store));
        let index = store.class_index();
        pool.install(|| self.usage_sweep(&mut units, &store, &index));
        let facts = store.freeze(index);
        debug!(classes = facts.classes().classes().count(), "facts frozen");

        pool.install(|| self.plan(&mut units, &facts));
        pool.install(|| self.rewrite(&mut units));

        let dead_fields = dead_fields(&units, &facts);
        pool.install(|| self.cleanup(&mut units, &dead_fields));

        let mut diagnostics = Vec::new();
        let generated = self.generate_config(&units, &facts, &input_paths, &mut diagnostics);

        for unit in &units {
            for (name, stats) in &unit.stats {
                self.stats
                    .entry(name.to_string())
                    .or_insert_with(|| RecipeStats::new(name.to_string()))
                    .merge(stats);
            }
        }

        let report = self.build_report(order, units, passthrough, generated, diagnostics);
        info!(
            changed = report.changed().count(),
            failed = report.failures().count(),
            "run finished"
        );
        Ok(report)
    }

    /// Parse every unit and record its declarations.
    fn declaration_sweep(&self, units: &mut [Unit], store: &FactStore) {
        let include_tests = self.config.include_tests;
        units.par_iter_mut().for_each_init(JavaParser::new, |parser, unit| {
            let parser = match parser {
                Ok(parser) => parser,
                Err(err) => return unit.fail(err.clone()),
            };
            let parsed = panic::catch_unwind(AssertUnwindSafe(|| parser.parse(&unit.input.text)));
            let tree = match parsed {
                Ok(Ok(tree)) => tree,
                Ok(Err(err)) => return unit.fail(err),
                Err(payload) => return unit.fail(panic_message(unit.path(), payload)),
            };

            let indexed = crate::facts::index_unit(&tree, unit.path());
            for class in indexed.classes {
                store.record_class(class);
            }
            if unit.contributes(include_tests) {
                let mut module = indexed.module;
                if unit.classification.is_main_source {
                    module.source_root = unit.classification.source_root.clone();
                } else {
                    module.packages.clear();
                }
                store.merge_module(&unit.classification.module_root, module);
            }
            unit.imports = Some(indexed.imports);
            unit.tree = Some(tree);
        });
    }

    /// Resolve references against the complete class index.
    fn usage_sweep(&self, units: &mut [Unit], store: &FactStore, index: &ClassIndex) {
        let include_tests = self.config.include_tests;
        units.par_iter_mut().for_each(|unit| {
            let (Some(tree), Some(imports)) = (&unit.tree, &unit.imports) else {
                return;
            };
            let scanned = panic::catch_unwind(AssertUnwindSafe(|| crate::facts::scan_unit(tree, imports, index)));
            let scan = match scanned {
                Ok(scan) => scan,
                Err(payload) => return unit.fail(panic_message(unit.path(), payload)),
            };

            let mut flavors = BTreeSet::new();
            for reference in &scan.references {
                let symbol = reference.symbol();
                store.record(symbol, reference.call_kind());
                match reference.role {
                    Role::Escape => store.record_ambiguity(symbol, Ambiguity::Escapes),
                    Role::Reassigned => store.record_ambiguity(symbol, Ambiguity::Reassigned),
                    _ => {}
                }
                if reference.deferred.is_some() {
                    store.record_ambiguity(symbol, Ambiguity::DeferredUse);
                }
                if reference.resolved.evidence == TypeEvidence::NameOnly {
                    store.record_ambiguity(symbol, Ambiguity::NameOnlyType);
                }
                if reference.call_kind() == Some(crate::facts::CallKind::Begin) {
                    flavors.extend(TxFlavor::of(reference.resolved.ty));
                }
            }
            if unit.contributes(include_tests) && !flavors.is_empty() {
                let module = ModuleState {
                    flavors,
                    ..Default::default()
                };
                store.merge_module(&unit.classification.module_root, module);
            }
            unit.scan = Some(scan);
            if let Err(err) = unit.record.advance(UnitState::Scanned) {
                unit.fail(err);
            }
        });
    }

    /// Ask every recipe about every editable unit.
    fn plan(&self, units: &mut [Unit], facts: &Facts) {
        let include_tests = self.config.include_tests;
        let enabled = &self.recipes;
        units.par_iter_mut().for_each(|unit| {
            if unit.failed() {
                return;
            }
            if unit.editable(include_tests) {
                let (Some(tree), Some(imports), Some(scan)) = (&unit.tree, &unit.imports, unit.scan.take()) else {
                    return;
                };
                let scanned = ScannedUnit {
                    tree: Arc::clone(tree),
                    imports: Arc::clone(imports),
                    scan,
                };
                let mut planned = Vec::new();
                for recipe in enabled.iter().filter(|r| r.matches(&scanned)) {
                    let start = Instant::now();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| recipe.plan(&scanned, facts)));
                    let stats = unit.stats_for(recipe.name());
                    stats.total_time_ms += start.elapsed().as_millis() as u64;
                    match result {
                        Ok(edits) => {
                            stats.candidates += edits.len() as u64;
                            planned.extend(edits);
                        }
                        Err(payload) => {
                            stats.errors += 1;
                            return unit.fail(panic_message(&unit.input.path, payload));
                        }
                    }
                }
                unit.outcomes = planned
                    .iter()
                    .map(|edit| OutcomeRecord {
                        recipe: edit.recipe.to_string(),
                        declaration: edit.declaration.clone(),
                        rule: edit.outcome.rule.label().to_string(),
                        category: edit.outcome.category,
                        reason: edit.outcome.reason.clone(),
                        applied: false,
                    })
                    .collect();
                unit.planned = planned;
                unit.scan = Some(scanned.scan);
            }
            if let Err(err) = unit.record.advance(UnitState::Classified) {
                unit.fail(err);
            }
        });
    }

    /// Apply the planned edits of every unit, innermost declarations first.
    fn rewrite(&self, units: &mut [Unit]) {
        units.par_iter_mut().for_each(|unit| {
            if unit.failed() {
                return;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.rewrite_unit(unit)));
            let next = match result {
                Ok(Ok(next)) => next,
                Ok(Err(err)) => {
                    let recipes: BTreeSet<&'static str> = unit.planned.iter().map(|e| e.recipe).collect();
                    for recipe in recipes {
                        unit.stats_for(recipe).errors += 1;
                    }
                    return unit.fail(err);
                }
                Err(payload) => {
                    let err = panic_message(&unit.input.path, payload);
                    return unit.fail(err);
                }
            };
            if let Err(err) = unit.record.advance(next) {
                unit.fail(err);
            }
        });
    }

    fn rewrite_unit(&self, unit: &mut Unit) -> Result<UnitState, RewriteError> {
        let Some(mut tree) = unit.tree.clone() else {
            return Ok(UnitState::Untouched);
        };
        let mark_only = unit.classification.declared_strategy == DeclaredStrategy::MarkOnly;

        let mut order: Vec<usize> = (0..unit.planned.len()).collect();
        // descending paths keep the paths of the remaining edits valid
        order.sort_by(|&a, &b| unit.planned[b].path.cmp(&unit.planned[a].path).then(a.cmp(&b)));

        let mut rewrites = 0;
        let mut markers = 0;
        let mut edits = ImportEdits::default();
        let mut removed: BTreeMap<Symbol, u32> = BTreeMap::new();
        let mut applied = vec![false; unit.planned.len()];
        let mut counted: Vec<(&'static str, bool)> = Vec::new();

        for i in order {
            let edit = &unit.planned[i];
            if mark_only && edit.outcome.is_linear() {
                debug!(declaration = %edit.declaration, "mark-only module, leaving linear outcome in place");
                continue;
            }
            let node = node_at(&tree, &edit.path)
                .cloned()
                .ok_or_else(|| RewriteError::InvalidPath { path: edit.path.clone() })?;
            let rewritten = self.engine.rewrite(&node, &edit.outcome, edit.recipe, &mut edits)?;
            if Arc::ptr_eq(&node, &rewritten) {
                continue;
            }
            if let Some(recipe) = self.recipes.iter().find(|r| r.name() == edit.recipe) {
                recipe.validate(&node, &rewritten)?;
            }
            tree = replace_at(&tree, &edit.path, rewritten)?;
            applied[i] = true;

            if edit.outcome.is_linear() {
                rewrites += 1;
                if let ExtractedParameters::Programmatic(plan) = &edit.outcome.params {
                    *removed.entry(plan.symbol.clone()).or_insert(0) += plan.removed_sites;
                }
            } else {
                markers += 1;
            }
            counted.push((edit.recipe, edit.outcome.is_linear()));
        }

        for (recipe, linear) in counted {
            let stats = unit.stats_for(recipe);
            if linear {
                stats.rewrites += 1;
            } else {
                stats.markers += 1;
            }
        }
        for (outcome, applied) in unit.outcomes.iter_mut().zip(applied) {
            outcome.applied = applied;
        }
        unit.tree = Some(tree);
        unit.import_edits = edits;
        unit.removed = removed;
        unit.linear_applied = rewrites;

        Ok(match (rewrites, markers) {
            (0, 0) => UnitState::Untouched,
            (0, _) => UnitState::Marked,
            _ => UnitState::Rewritten,
        })
    }

    /// Apply import edits and drop dead fields, then re-parse the result.
    fn cleanup(&self, units: &mut [Unit], dead_fields: &BTreeSet<Symbol>) {
        units.par_iter_mut().for_each_init(JavaParser::new, |parser, unit| {
            if unit.failed() {
                return;
            }
            let Some(tree) = unit.tree.clone() else {
                return;
            };
            let touched = unit.record.disposition != Some(UnitState::Untouched);
            if touched || !dead_fields.is_empty() {
                let cleaned = panic::catch_unwind(AssertUnwindSafe(|| cleanup(&tree, &unit.import_edits, dead_fields)));
                let cleaned = match cleaned {
                    Ok(Ok(cleaned)) => cleaned,
                    Ok(Err(err)) => return unit.fail(err),
                    Err(payload) => return unit.fail(panic_message(&unit.input.path, payload)),
                };
                if !Arc::ptr_eq(&tree, &cleaned) {
                    let text = cleaned.to_source();
                    if text != unit.input.text {
                        if let Ok(parser) = parser {
                            if let Err(err) = parser.parse(&text) {
                                return unit.fail(format!("rewritten unit does not parse: {err}"));
                            }
                        }
                    }
                }
                unit.tree = Some(cleaned);
            }
            if let Err(err) = unit.record.advance(UnitState::Cleaned) {
                unit.fail(err);
            }
        });
    }

    /// Generated configuration units, one per qualifying module.
    fn generate_config(
        &self,
        units: &[Unit],
        facts: &Facts,
        input_paths: &HashSet<PathBuf>,
        diagnostics: &mut Vec<String>,
    ) -> Vec<UnitOutput> {
        if !self.config.generate_config {
            return Vec::new();
        }
        let mut linear_per_module: BTreeMap<&Path, usize> = BTreeMap::new();
        for unit in units.iter().filter(|u| !u.failed() && u.linear_applied > 0) {
            *linear_per_module.entry(&unit.classification.module_root).or_insert(0) += unit.linear_applied;
        }

        let mut generated = Vec::new();
        for (module_root, count) in linear_per_module {
            let Some(state) = facts.module(module_root) else {
                continue;
            };
            let module = if module_root.as_os_str().is_empty() {
                ".".to_string()
            } else {
                module_root.display().to_string()
            };
            if let Some(existing) = &state.transaction_config {
                debug!(module = %module, config = %existing.display(), "transaction management already enabled");
                continue;
            }
            if state.boot_application || state.has_auto_configuration_keys() {
                debug!(module = %module, "transactions are auto-configured");
                continue;
            }
            let flavors = state.manager_flavors();
            let flavor = match flavors.len() {
                1 => flavors.into_iter().next(),
                0 => None,
                _ => {
                    let names: Vec<String> = flavors.iter().map(|f| format!("{f:?}")).collect();
                    diagnostics.push(format!(
                        "module {module} mixes transaction styles ({}); configure the transaction manager by hand",
                        names.join(", ")
                    ));
                    None
                }
            };
            let (Some(flavor), Some(source_root)) = (flavor, &state.source_root) else {
                continue;
            };
            let package = state.base_package();
            let mut path = source_root.clone();
            if let Some(package) = &package {
                path.extend(package.split('.'));
            }
            path.push(format!("{}.java", self.config.config_class_name));
            if input_paths.contains(&path) {
                diagnostics.push(format!(
                    "module {module}: {} already exists; configuration class not generated",
                    path.display()
                ));
                continue;
            }

            let unit = build_config_unit(
                package.as_deref(),
                &self.config.config_class_name,
                flavor,
                state.persistence_namespace.as_deref(),
            );
            info!(module = %module, rewrites = count, path = %path.display(), "generating transaction configuration");
            generated.push(UnitOutput {
                path,
                text: unit.to_source(),
                change: Change::Generated,
            });
        }
        generated
    }

    fn build_report(
        &self,
        order: Vec<PathBuf>,
        units: Vec<Unit>,
        passthrough: Vec<SourceInput>,
        generated: Vec<UnitOutput>,
        diagnostics: Vec<String>,
    ) -> RunReport {
        let mut outputs: HashMap<PathBuf, UnitOutput> = HashMap::new();
        let mut reports = Vec::with_capacity(units.len());
        for unit in units {
            let text = match (&unit.tree, unit.failed()) {
                (Some(tree), false) => tree.to_source(),
                _ => unit.input.text.clone(),
            };
            let change = if text == unit.input.text {
                Change::Unchanged
            } else {
                Change::Modified
            };
            reports.push(UnitReport {
                path: unit.input.path.clone(),
                state: unit.record.state,
                disposition: unit.record.disposition,
                outcomes: unit.outcomes,
                error: unit.record.error,
            });
            outputs.insert(
                unit.input.path.clone(),
                UnitOutput {
                    path: unit.input.path,
                    text,
                    change,
                },
            );
        }
        for input in passthrough {
            outputs.insert(
                input.path.clone(),
                UnitOutput {
                    path: input.path,
                    text: input.text,
                    change: Change::Unchanged,
                },
            );
        }

        let mut ordered: Vec<UnitOutput> = order.iter().filter_map(|path| outputs.remove(path)).collect();
        ordered.extend(generated);

        let stats = self
            .stats
            .iter()
            .map(|(name, stats)| (name.clone(), stats.clone()))
            .collect();
        RunReport {
            outputs: ordered,
            units: reports,
            diagnostics,
            stats,
        }
    }
}

/// Tracked transaction fields with no usage left after the run.
fn dead_fields(units: &[Unit], facts: &Facts) -> BTreeSet<Symbol> {
    let mut removed: BTreeMap<&Symbol, u32> = BTreeMap::new();
    for unit in units.iter().filter(|u| !u.failed()) {
        for (symbol, count) in &unit.removed {
            *removed.entry(symbol).or_insert(0) += count;
        }
    }

    facts
        .usages()
        .filter(|(symbol, usage)| {
            let OwnerScope::Class(class) = &symbol.owner else {
                return false;
            };
            if symbol.is_derived() || usage.sites == 0 {
                return false;
            }
            let retained = usage.sites.saturating_sub(removed.get(symbol).copied().unwrap_or(0));
            retained == 0
                && facts
                    .classes()
                    .get(class)
                    .and_then(|c| c.fields.get(&symbol.name))
                    .map(|f| f.is_transaction() && f.single_declarator && !f.public)
                    .unwrap_or(false)
        })
        .map(|(symbol, _)| symbol.clone())
        .collect()
}
