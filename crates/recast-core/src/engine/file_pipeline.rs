/*!
# FileMigrator - File-based Migration

Collects source files from disk, runs them through one [`Pipeline`] so that
facts are shared across every file, and writes the changed and generated
units back, either in place or under an output directory.
*/

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use super::pipeline::Pipeline;
use super::report::{Change, RunReport};
use super::SourceInput;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &["target", "build", "out", "node_modules", ".git", ".gradle", ".idea"];

/// File-based migration driver
pub struct FileMigrator {
    pipeline: Pipeline,
    source_extensions: Vec<String>,
    output_dir: Option<PathBuf>,
    dry_run: bool,
    backup_originals: bool,
}

impl FileMigrator {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            source_extensions: vec!["java".to_string(), "properties".to_string()],
            output_dir: None,
            dry_run: false,
            backup_originals: false,
        }
    }

    /// Set the file extensions to read
    pub fn source_extensions(mut self, extensions: Vec<String>) -> Self {
        self.source_extensions = extensions;
        self
    }

    /// Write results below `dir` instead of in place
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Compute everything but write nothing
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Keep a `.orig` copy of every file overwritten in place
    pub fn backup_originals(mut self, backup: bool) -> Self {
        self.backup_originals = backup;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Migrate everything below `root`
    pub fn migrate_directory<P: AsRef<Path>>(&mut self, root: P) -> Result<(RunReport, FileMigrationSummary)> {
        self.migrate_paths(&[root.as_ref().to_path_buf()])
    }

    /// Migrate files and directories as one batch
    pub fn migrate_paths(&mut self, roots: &[PathBuf]) -> Result<(RunReport, FileMigrationSummary)> {
        let inputs = self.collect_inputs(roots)?;
        info!(files = inputs.len(), "collected sources");
        let report = self.pipeline.run(inputs)?;
        let mut summary = self.write_outputs(&report)?;
        for unit in report.failures() {
            summary.errors.push(format!(
                "{}: {}",
                unit.path.display(),
                unit.error.as_deref().unwrap_or("unknown error")
            ));
        }
        Ok((report, summary))
    }

    /// Read every matching file below the given roots
    pub fn collect_inputs(&self, roots: &[PathBuf]) -> Result<Vec<SourceInput>> {
        let mut files = Vec::new();
        for root in roots {
            if !root.exists() {
                return Err(anyhow!("Source path does not exist: {}", root.display()));
            }
            if root.is_file() {
                files.push(root.clone());
            } else {
                self.collect_recursive(root, &mut files)?;
            }
        }
        files.sort();
        files.dedup();

        files
            .into_iter()
            .map(|path| {
                let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
                Ok(SourceInput::new(path, text))
            })
            .collect()
    }

    fn collect_recursive(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                let skipped = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| SKIPPED_DIRS.contains(&n))
                    .unwrap_or(false);
                if !skipped {
                    self.collect_recursive(&path, out)?;
                }
            } else if self.should_process_file(&path) {
                out.push(path);
            }
        }
        Ok(())
    }

    /// Check if a file should be read based on its extension
    fn should_process_file(&self, path: &Path) -> bool {
        if let Some(extension) = path.extension() {
            let ext_str = extension.to_string_lossy().to_lowercase();
            self.source_extensions.iter().any(|ext| ext.to_lowercase() == ext_str)
        } else {
            false
        }
    }

    /// Where an output unit is written
    pub fn destination(&self, path: &Path) -> PathBuf {
        match &self.output_dir {
            None => path.to_path_buf(),
            Some(dir) => dir.join(relative(path)),
        }
    }

    fn write_outputs(&self, report: &RunReport) -> Result<FileMigrationSummary> {
        let mut summary = FileMigrationSummary::new();
        for output in &report.outputs {
            summary.files_processed += 1;
            let copy_unchanged = self.output_dir.is_some();
            match output.change {
                Change::Unchanged if !copy_unchanged => continue,
                Change::Modified => summary.files_modified += 1,
                Change::Generated => summary.files_generated += 1,
                Change::Unchanged => {}
            }
            if self.dry_run {
                debug!(path = %output.path.display(), "dry run, not writing");
                continue;
            }

            let destination = self.destination(&output.path);
            if let Some(parent) = destination.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                    summary.directories_created += 1;
                }
            }
            if self.backup_originals && self.output_dir.is_none() && destination.exists() {
                let mut backup = destination.clone().into_os_string();
                backup.push(".orig");
                fs::copy(&destination, PathBuf::from(backup))?;
            }
            fs::write(&destination, &output.text)
                .with_context(|| format!("Failed to write {}", destination.display()))?;
        }
        Ok(summary)
    }
}

/// `path` with root, prefix and parent components dropped, so it can be
/// joined below an output directory.
fn relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// Summary of file migration results
#[derive(Debug, Default)]
pub struct FileMigrationSummary {
    pub files_processed: u64,
    pub files_modified: u64,
    pub files_generated: u64,
    pub directories_created: u64,
    pub errors: Vec<String>,
}

impl FileMigrationSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: FileMigrationSummary) {
        self.files_processed += other.files_processed;
        self.files_modified += other.files_modified;
        self.files_generated += other.files_generated;
        self.directories_created += other.directories_created;
        self.errors.extend(other.errors);
    }

    pub fn success_rate(&self) -> f64 {
        if self.files_processed == 0 {
            0.0
        } else {
            (self.files_modified as f64) / (self.files_processed as f64)
        }
    }

    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}
