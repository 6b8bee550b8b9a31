/*!
# Module Configuration

Maps a source path to the module it belongs to and to how that module wants
to be treated. The pipeline only talks to the [`ModuleConfigProvider`] trait;
[`LayoutProvider`] recognises the conventional Maven/Gradle layout.
*/

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// What a module asked the run to do with its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclaredStrategy {
    /// Rewrite LINEAR outcomes and mark COMPLEX ones.
    #[default]
    Rewrite,
    /// Report LINEAR outcomes without applying them; mark COMPLEX ones.
    MarkOnly,
    /// Scan only.
    Skip,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown strategy '{0}' (expected rewrite, mark-only or skip)")]
pub struct UnknownStrategy(pub String);

impl FromStr for DeclaredStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rewrite" => Ok(DeclaredStrategy::Rewrite),
            "mark-only" | "mark_only" | "markonly" => Ok(DeclaredStrategy::MarkOnly),
            "skip" => Ok(DeclaredStrategy::Skip),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for DeclaredStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeclaredStrategy::Rewrite => "rewrite",
            DeclaredStrategy::MarkOnly => "mark-only",
            DeclaredStrategy::Skip => "skip",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceClassification {
    pub module_root: PathBuf,
    /// `src/main/java` of the module, when the layout has one.
    pub source_root: Option<PathBuf>,
    pub is_main_source: bool,
    pub is_test_source: bool,
    pub declared_strategy: DeclaredStrategy,
}

pub trait ModuleConfigProvider: Send + Sync {
    fn classify(&self, path: &Path) -> SourceClassification;
}

/// Classifies paths by the `src/{main,test}/{java,resources}` convention.
///
/// Paths outside that layout form one flat module rooted at the empty path;
/// flat modules have no source root, so no configuration class is generated
/// for them.
#[derive(Default)]
pub struct LayoutProvider {
    strategies: BTreeMap<String, String>,
    cache: DashMap<PathBuf, DeclaredStrategy>,
    warned: Mutex<HashSet<String>>,
}

impl LayoutProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declared strategies keyed by module name (last path component of the
    /// module root) or by the module root itself.
    pub fn with_strategies(mut self, strategies: BTreeMap<String, String>) -> Self {
        self.strategies = strategies;
        self
    }

    fn strategy_for(&self, module_root: &Path) -> DeclaredStrategy {
        if let Some(cached) = self.cache.get(module_root) {
            return *cached;
        }
        let full = module_root.to_string_lossy().to_string();
        let name = module_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let declared = self.strategies.get(&full).or_else(|| self.strategies.get(&name));
        let strategy = match declared {
            None => DeclaredStrategy::default(),
            Some(value) => value.parse().unwrap_or_else(|err: UnknownStrategy| {
                if self.warned.lock().insert(full.clone()) {
                    warn!(module = %full, "{err}; using rewrite");
                }
                DeclaredStrategy::default()
            }),
        };
        self.cache.insert(module_root.to_path_buf(), strategy);
        strategy
    }
}

impl ModuleConfigProvider for LayoutProvider {
    fn classify(&self, path: &Path) -> SourceClassification {
        let components: Vec<Component<'_>> = path.components().collect();
        let layout = components.windows(3).enumerate().rev().find_map(|(at, window)| {
            let [src, set, kind] = window else {
                return None;
            };
            let is = |c: &Component<'_>, name: &str| c.as_os_str() == name;
            if !is(src, "src") || !(is(kind, "java") || is(kind, "resources")) {
                return None;
            }
            if is(set, "main") {
                Some((at, true))
            } else if is(set, "test") {
                Some((at, false))
            } else {
                None
            }
        });

        match layout {
            Some((at, is_main)) => {
                let module_root: PathBuf = components[..at].iter().collect();
                let source_root = module_root.join("src").join("main").join("java");
                SourceClassification {
                    declared_strategy: self.strategy_for(&module_root),
                    module_root,
                    source_root: Some(source_root),
                    is_main_source: is_main,
                    is_test_source: !is_main,
                }
            }
            None => {
                let module_root = PathBuf::new();
                SourceClassification {
                    declared_strategy: self.strategy_for(&module_root),
                    module_root,
                    source_root: None,
                    is_main_source: true,
                    is_test_source: false,
                }
            }
        }
    }
}

/// Whether a resource file contributes configuration keys.
pub fn is_application_properties(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with("application") && name.ends_with(".properties")
}

/// Keys declared in a `.properties` file.
pub fn properties_keys(text: &str) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    let mut continued = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        let was_continued = continued;
        continued = trimmed.ends_with('\\') && !trimmed.ends_with("\\\\");
        if was_continued || trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }
        let mut key = String::new();
        let mut escaped = false;
        for ch in trimmed.chars() {
            if escaped {
                key.push(ch);
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '=' || ch == ':' || ch.is_whitespace() {
                break;
            } else {
                key.push(ch);
            }
        }
        if !key.is_empty() {
            keys.insert(key);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maven_layout_is_recognised() {
        let provider = LayoutProvider::new();
        let main = provider.classify(Path::new("shop/orders/src/main/java/com/acme/Orders.java"));
        assert_eq!(main.module_root, PathBuf::from("shop/orders"));
        assert_eq!(main.source_root, Some(PathBuf::from("shop/orders/src/main/java")));
        assert!(main.is_main_source);

        let test = provider.classify(Path::new("shop/orders/src/test/java/com/acme/OrdersTest.java"));
        assert_eq!(test.module_root, PathBuf::from("shop/orders"));
        assert!(test.is_test_source);

        let resources = provider.classify(Path::new("shop/orders/src/main/resources/application.properties"));
        assert_eq!(resources.module_root, PathBuf::from("shop/orders"));
    }

    #[test]
    fn flat_layout_has_no_source_root() {
        let classification = LayoutProvider::new().classify(Path::new("com/acme/Orders.java"));
        assert_eq!(classification.module_root, PathBuf::new());
        assert_eq!(classification.source_root, None);
        assert!(classification.is_main_source);
    }

    #[test]
    fn strategies_are_looked_up_by_module_name() {
        let strategies = [
            ("orders".to_string(), "mark-only".to_string()),
            ("billing".to_string(), "sometimes".to_string()),
        ]
        .into_iter()
        .collect();
        let provider = LayoutProvider::new().with_strategies(strategies);
        let orders = provider.classify(Path::new("orders/src/main/java/A.java"));
        assert_eq!(orders.declared_strategy, DeclaredStrategy::MarkOnly);
        let billing = provider.classify(Path::new("billing/src/main/java/B.java"));
        assert_eq!(billing.declared_strategy, DeclaredStrategy::Rewrite);
        let other = provider.classify(Path::new("other/src/main/java/C.java"));
        assert_eq!(other.declared_strategy, DeclaredStrategy::Rewrite);
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("skip".parse::<DeclaredStrategy>().unwrap(), DeclaredStrategy::Skip);
        assert_eq!("Mark-Only".parse::<DeclaredStrategy>().unwrap(), DeclaredStrategy::MarkOnly);
        assert!("never".parse::<DeclaredStrategy>().is_err());
        assert_eq!(DeclaredStrategy::MarkOnly.to_string(), "mark-only");
    }

    #[test]
    fn properties_keys_skip_comments_and_continuations() {
        let text = "# datasource\nspring.datasource.url=jdbc:h2:mem\n! legacy\nspring.jpa.show-sql : true\nlist=a,\\\n  b,\\\n  c\nkey\\=with\\ escape=1\n\nbare\n";
        let keys: Vec<String> = properties_keys(text).into_iter().collect();
        assert_eq!(
            keys,
            vec!["bare", "key=with escape", "list", "spring.datasource.url", "spring.jpa.show-sql"]
        );
    }

    #[test]
    fn application_properties_are_detected() {
        assert!(is_application_properties(Path::new("src/main/resources/application-dev.properties")));
        assert!(!is_application_properties(Path::new("src/main/resources/messages.properties")));
    }
}
