use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use recast_core::engine::{Change, FileMigrator, Pipeline};
use recast_core::module_config::DeclaredStrategy;
use recast_core::{init_tracing_with, RecastConfig};
use tracing::info;

fn command() -> Command {
    Command::new("recast")
        .version(recast_core::VERSION)
        .about("Migrate Java transaction demarcation to Spring @Transactional")
        .arg(
            Arg::new("paths")
                .value_name("PATHS")
                .help("Source files or directories to migrate as one batch")
                .num_args(1..)
                .default_value("."),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("DIR")
                .help("Write results below DIR instead of in place"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Compute the migration without writing files")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("include-tests")
                .long("include-tests")
                .help("Also rewrite and mark test sources")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("recipe")
                .long("recipe")
                .value_name("NAME")
                .help("Recipe to run (repeatable); all recipes by default")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("strategy")
                .long("strategy")
                .value_name("MODULE=STRATEGY")
                .help("Per-module strategy: rewrite, mark-only or skip (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file; flags override its values"),
        )
        .arg(
            Arg::new("jobs")
                .long("jobs")
                .short('j')
                .value_name("N")
                .help("Worker threads")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .value_name("FILE")
                .help("Write the JSON run report to FILE"),
        )
        .arg(
            Arg::new("list-recipes")
                .long("list-recipes")
                .help("Print the selected recipes and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
}

/// Configuration file values overridden by command-line flags.
fn build_config(matches: &ArgMatches) -> Result<RecastConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => RecastConfig::from_json_file(path).with_context(|| format!("loading {path}"))?,
        None => RecastConfig::default(),
    };
    if let Some(jobs) = matches.get_one::<usize>("jobs") {
        config.jobs = *jobs;
    }
    if matches.get_flag("include-tests") {
        config.include_tests = true;
    }
    if matches.get_flag("debug") {
        config.debug = true;
    }
    if let Some(recipes) = matches.get_many::<String>("recipe") {
        config.recipes = recipes.cloned().collect();
    }
    if let Some(strategies) = matches.get_many::<String>("strategy") {
        for entry in strategies {
            let (module, strategy) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("expected MODULE=STRATEGY, got '{entry}'"))?;
            strategy
                .parse::<DeclaredStrategy>()
                .with_context(|| format!("--strategy {entry}"))?;
            config.strategies.insert(module.to_string(), strategy.to_string());
        }
    }
    Ok(config)
}

/// One line per recipe: its name and what it does.
fn recipe_listing(pipeline: &Pipeline) -> Vec<String> {
    pipeline
        .recipes()
        .map(|recipe| format!("{:<28} {}", recipe.name(), recipe.description()))
        .collect()
}

fn log_recipe_stats(pipeline: &Pipeline) {
    let mut stats: Vec<_> = pipeline.stats().values().collect();
    stats.sort_by(|a, b| a.recipe_name.cmp(&b.recipe_name));
    for stats in stats {
        info!(
            recipe = %stats.recipe_name,
            candidates = stats.candidates,
            rewrites = stats.rewrites,
            markers = stats.markers,
            errors = stats.errors,
            rewritten_share = format!("{:.2}", stats.success_rate()),
            average_ms = format!("{:.2}", stats.average_time_ms()),
            "recipe statistics"
        );
    }
}

fn main() -> Result<()> {
    let matches = command().get_matches();
    let config = build_config(&matches)?;

    init_tracing_with(if config.debug { "recast_core=debug,recast=debug" } else { "recast_core=info" });

    let paths: Vec<PathBuf> = matches
        .get_many::<String>("paths")
        .map(|values| values.map(PathBuf::from).collect())
        .unwrap_or_default();
    let dry_run = matches.get_flag("dry-run");

    let pipeline = Pipeline::builtin(config);
    if matches.get_flag("list-recipes") {
        for line in recipe_listing(&pipeline) {
            println!("{line}");
        }
        return Ok(());
    }

    let mut migrator = FileMigrator::new(pipeline).dry_run(dry_run);
    if let Some(output) = matches.get_one::<String>("output") {
        migrator = migrator.output_dir(output);
    }

    let (report, summary) = migrator.migrate_paths(&paths)?;
    log_recipe_stats(migrator.pipeline());

    for unit in &report.units {
        for outcome in &unit.outcomes {
            info!(
                path = %unit.path.display(),
                recipe = %outcome.recipe,
                declaration = %outcome.declaration,
                rule = %outcome.rule,
                applied = outcome.applied,
                "{}",
                outcome.reason
            );
        }
    }
    for diagnostic in &report.diagnostics {
        eprintln!("warning: {diagnostic}");
    }
    for error in &summary.errors {
        eprintln!("error: {error}");
    }

    let verb = if dry_run { "would change" } else { "changed" };
    for output in report.changed() {
        let kind = match output.change {
            Change::Generated => "generated",
            _ => "modified",
        };
        println!("{verb} {} ({kind})", migrator.destination(&output.path).display());
    }
    println!(
        "{} files processed, {} modified, {} generated, {} failed; checksum {}",
        summary.files_processed,
        summary.files_modified,
        summary.files_generated,
        report.failures().count(),
        report.checksum()
    );

    if let Some(path) = matches.get_one::<String>("report") {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("writing report to {path}"))?;
    }

    if !summary.success() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let matches = command()
            .try_get_matches_from([
                "recast",
                "shop",
                "--jobs",
                "3",
                "--recipe",
                "programmatic-transactions",
                "--strategy",
                "orders=mark-only",
                "--include-tests",
            ])
            .unwrap();
        let config = build_config(&matches).unwrap();
        assert_eq!(config.jobs, 3);
        assert!(config.include_tests);
        assert_eq!(config.recipes, vec!["programmatic-transactions".to_string()]);
        assert_eq!(config.strategies.get("orders").map(String::as_str), Some("mark-only"));
    }

    #[test]
    fn malformed_strategies_are_rejected() {
        let matches = command()
            .try_get_matches_from(["recast", "--strategy", "orders"])
            .unwrap();
        assert!(build_config(&matches).is_err());
        let matches = command()
            .try_get_matches_from(["recast", "--strategy", "orders=sometimes"])
            .unwrap();
        assert!(build_config(&matches).is_err());
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recast.json");
        fs::write(&path, r#"{ "generate_config": false, "jobs": 1 }"#).unwrap();
        let matches = command()
            .try_get_matches_from(["recast", "--config", path.to_str().unwrap(), "--jobs", "4"])
            .unwrap();
        let config = build_config(&matches).unwrap();
        assert!(!config.generate_config);
        assert_eq!(config.jobs, 4);
    }

    #[test]
    fn recipe_selection_shapes_the_listing() {
        let matches = command()
            .try_get_matches_from(["recast", "--list-recipes", "--recipe", "programmatic-transactions"])
            .unwrap();
        assert!(matches.get_flag("list-recipes"));
        let pipeline = Pipeline::builtin(build_config(&matches).unwrap());
        let listing = recipe_listing(&pipeline);
        assert_eq!(listing.len(), 1);
        assert!(listing[0].starts_with("programmatic-transactions "), "{}", listing[0]);

        let all = recipe_listing(&Pipeline::builtin(RecastConfig::default()));
        assert!(all.len() > 1);
        assert!(all.iter().all(|line| line.split_whitespace().count() > 1));
    }
}
