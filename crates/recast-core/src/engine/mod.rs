/*!
# Pipeline Driver

Runs a batch of source units through the two-phase migration:

1. **Scan**: parse every unit, then a declaration sweep and a usage sweep
   fill the shared [`FactStore`](crate::facts::FactStore). The sweeps are
   separated by a barrier because resolving an inherited field in one unit
   needs the declaration recorded from another.
2. **Rewrite**: the frozen facts drive classification, tree-local rewrites,
   unit cleanup and generation of configuration units.

## Architecture

- `Recipe`: trait for transformation units
- `Pipeline`: in-memory engine with recipe management
- `FileMigrator`: reads a source tree, runs the pipeline, writes the result
- `UnitState`: per-unit lifecycle
- Pattern matching utilities for locating declarations

## Example Usage

```rust,no_run
use recast_core::engine::{Pipeline, SourceInput};
use recast_core::RecastConfig;

let mut pipeline = Pipeline::builtin(RecastConfig::default());
let report = pipeline.run(vec![SourceInput::new("src/main/java/com/acme/Orders.java", "...")])?;
println!("{}", report.checksum());
# Ok::<(), recast_core::errors::PipelineError>(())
```
*/

use std::path::PathBuf;
use std::sync::Arc;

use crate::ast::SyntaxNode;
use crate::facts::UnitScan;
use crate::symbols::ImportTable;

pub mod file_pipeline;
pub mod patterns;
pub mod pipeline;
pub mod recipe;
pub mod report;
pub mod state;

pub use file_pipeline::{FileMigrationSummary, FileMigrator};
pub use patterns::{NodePattern, NodeWalker, PatternMatcher};
pub use pipeline::Pipeline;
pub use recipe::{PlannedEdit, Recipe, RecipeStats};
pub use report::{Change, OutcomeRecord, RunReport, UnitOutput, UnitReport};
pub use state::{UnitRecord, UnitState};

/// One input unit: its path and full text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInput {
    pub path: PathBuf,
    pub text: String,
}

impl SourceInput {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// A parsed and scanned unit, as recipes see it.
#[derive(Debug, Clone)]
pub struct ScannedUnit {
    pub tree: Arc<SyntaxNode>,
    pub imports: Arc<ImportTable>,
    pub scan: UnitScan,
}
