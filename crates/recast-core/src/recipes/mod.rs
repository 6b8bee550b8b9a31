//! Built-in transformation units.

use tracing::warn;

use crate::engine::Recipe;

pub mod config;
pub mod ejb_attributes;
pub mod programmatic;

pub use ejb_attributes::EjbTransactionAttributes;
pub use programmatic::ProgrammaticTransactions;

/// Names of every built-in recipe.
pub const RECIPES: &[&str] = &[programmatic::NAME, ejb_attributes::NAME];

fn by_name(name: &str) -> Option<Box<dyn Recipe>> {
    match name {
        programmatic::NAME => Some(Box::new(ProgrammaticTransactions)),
        ejb_attributes::NAME => Some(Box::new(EjbTransactionAttributes)),
        _ => None,
    }
}

/// The named recipes, or all of them when `names` is empty. An unknown name
/// is logged and the run falls back to every recipe.
pub fn builtin_recipes(names: &[String]) -> Vec<Box<dyn Recipe>> {
    let all = || -> Vec<Box<dyn Recipe>> { RECIPES.iter().filter_map(|n| by_name(n)).collect() };
    if names.is_empty() {
        return all();
    }
    let mut selected = Vec::new();
    for name in names {
        match by_name(name) {
            Some(recipe) => selected.push(recipe),
            None => {
                warn!("unknown recipe '{name}' (known: {}); running all recipes", RECIPES.join(", "));
                return all();
            }
        }
    }
    selected
}
