use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::outputs::fingerprint::default_fold_case;
use crate::outputs::{Fingerprinter, HashMethod, TaskOutputsBuilder};
use crate::storage::default_cache_dir;

/// Complete taskout configuration (loaded from `taskout.toml`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskoutConfig {
    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub fingerprint: FingerprintConfig,

    /// Task definitions keyed by task identity
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,

    /// Directory relative paths resolve against: the project config's
    /// directory, or the current directory when unset
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

/// Execution history storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Directory holding one record per task
    #[serde(default = "default_history_dir")]
    pub dir: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: default_history_dir(),
        }
    }
}

/// Local build cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory path, the platform cache directory when unset
    #[serde(default)]
    pub dir: Option<String>,

    /// Global switch; when false no task reads or writes the cache
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FingerprintConfig {
    #[serde(default)]
    pub method: HashMethod,

    /// Compare paths case-insensitively. Defaults to the platform convention.
    #[serde(default)]
    pub fold_case: Option<bool>,

    /// Hashing threads, 0 for one per core. Uses the global pool when unset.
    #[serde(default)]
    pub threads: Option<usize>,
}

/// A task declared in the config file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskConfig {
    /// Opt into the build cache
    #[serde(default)]
    pub cacheable: bool,

    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub name: String,
    pub paths: Vec<String>,
    #[serde(default = "default_true")]
    pub cacheable: bool,
}

fn default_history_dir() -> String {
    ".taskout/history".to_string()
}

fn default_true() -> bool {
    true
}

impl TaskoutConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: TaskoutConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.root = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Generate example configuration as TOML string
    pub fn example() -> Result<String> {
        let mut tasks = BTreeMap::new();
        tasks.insert(
            ":compileJava".to_string(),
            TaskConfig {
                cacheable: true,
                outputs: vec![OutputConfig {
                    name: "classes".to_string(),
                    paths: vec!["build/classes".to_string()],
                    cacheable: true,
                }],
            },
        );
        tasks.insert(
            ":test".to_string(),
            TaskConfig {
                cacheable: true,
                outputs: vec![
                    OutputConfig {
                        name: "results".to_string(),
                        paths: vec!["build/test-results".to_string()],
                        cacheable: true,
                    },
                    OutputConfig {
                        name: "report".to_string(),
                        paths: vec!["build/reports/tests".to_string()],
                        cacheable: false,
                    },
                ],
            },
        );

        let config = TaskoutConfig {
            cache: CacheConfig {
                dir: Some(".taskout/cache".to_string()),
                enabled: true,
            },
            fingerprint: FingerprintConfig {
                threads: Some(0),
                ..Default::default()
            },
            tasks,
            ..Default::default()
        };
        toml::to_string_pretty(&config).context("Failed to render example configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.history.dir.is_empty() {
            anyhow::bail!("history.dir must not be empty");
        }

        if matches!(self.cache.dir.as_deref(), Some("")) {
            anyhow::bail!("cache.dir must not be empty when set");
        }

        for (identity, task) in &self.tasks {
            if identity.is_empty() {
                anyhow::bail!("task identities must not be empty");
            }

            let mut seen = HashSet::new();
            for output in &task.outputs {
                if output.name.is_empty() {
                    anyhow::bail!("tasks.{identity}: output names must not be empty");
                }
                if !seen.insert(output.name.as_str()) {
                    anyhow::bail!(
                        "tasks.{identity}: output '{}' is declared more than once",
                        output.name
                    );
                }
                if output.paths.is_empty() {
                    anyhow::bail!(
                        "tasks.{identity}: output '{}' must list at least one path",
                        output.name
                    );
                }
            }
        }

        Ok(())
    }

    /// Directory relative paths in this config are resolved against.
    pub fn project_root(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) if !root.as_os_str().is_empty() => Ok(root.clone()),
            _ => std::env::current_dir().context("Failed to get current directory"),
        }
    }

    pub fn history_dir(&self) -> Result<PathBuf> {
        Ok(self.project_root()?.join(&self.history.dir))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        Ok(match &self.cache.dir {
            Some(dir) => self.project_root()?.join(dir),
            None => default_cache_dir(),
        })
    }

    /// Builds a fingerprinter rooted at `base_dir` from the `[fingerprint]` section.
    pub fn fingerprinter(&self, base_dir: &Path) -> Result<Fingerprinter> {
        let mut fingerprinter = Fingerprinter::new(base_dir)
            .with_method(self.fingerprint.method)
            .with_fold_case(self.fingerprint.fold_case.unwrap_or_else(default_fold_case));
        if let Some(threads) = self.fingerprint.threads {
            fingerprinter = fingerprinter
                .with_threads(threads)
                .context("Failed to create hashing thread pool")?;
        }
        Ok(fingerprinter)
    }

    /// Adds the outputs configured for `identity` to a task builder.
    ///
    /// Returns false when the config does not define the task.
    pub fn apply_task(&self, identity: &str, builder: &mut TaskOutputsBuilder) -> Result<bool> {
        let Some(task) = self.tasks.get(identity) else {
            return Ok(false);
        };

        for output in &task.outputs {
            builder
                .declare(&output.name, &output.paths, output.cacheable)
                .with_context(|| format!("Invalid outputs for task {identity}"))?;
        }
        builder.cacheable(task.cacheable);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::{HistoryStore, TaskOutputs};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config: TaskoutConfig = toml::from_str("").unwrap();
        assert_eq!(config.history.dir, ".taskout/history");
        assert!(config.cache.enabled);
        assert!(config.cache.dir.is_none());
        assert_eq!(config.fingerprint.method, HashMethod::Content);
        assert!(config.tasks.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_tasks() {
        let config: TaskoutConfig = toml::from_str(
            r#"
[fingerprint]
method = "mtime"
fold_case = false

[tasks.":compileJava"]
cacheable = true
outputs = [
  { name = "classes", paths = ["build/classes"] },
  { name = "report", paths = ["build/report.html"], cacheable = false },
]
"#,
        )
        .unwrap();

        assert_eq!(config.fingerprint.method, HashMethod::Mtime);
        assert_eq!(config.fingerprint.fold_case, Some(false));

        let task = &config.tasks[":compileJava"];
        assert!(task.cacheable);
        assert_eq!(task.outputs.len(), 2);
        assert!(task.outputs[0].cacheable);
        assert!(!task.outputs[1].cacheable);
        config.validate().unwrap();
    }

    #[test]
    fn test_example_is_valid() {
        let example = TaskoutConfig::example().unwrap();
        let config: TaskoutConfig = toml::from_str(&example).unwrap();
        config.validate().unwrap();
        assert_eq!(config.tasks.len(), 2);
    }

    #[test]
    fn test_validate_rejects_duplicate_outputs() {
        let config: TaskoutConfig = toml::from_str(
            r#"
[tasks.build]
outputs = [
  { name = "dist", paths = ["dist"] },
  { name = "dist", paths = ["out"] },
]
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn test_validate_rejects_empty_paths() {
        let config: TaskoutConfig = toml::from_str(
            r#"
[tasks.build]
outputs = [{ name = "dist", paths = [] }]
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_dirs() {
        let mut config = TaskoutConfig::default();
        config.history.dir.clear();
        assert!(config.validate().is_err());

        let mut config = TaskoutConfig::default();
        config.cache.dir = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_sets_root() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("taskout.toml");
        fs::write(&path, "[history]\ndir = \"state/history\"\n").unwrap();

        let config = TaskoutConfig::from_file(&path).unwrap();
        assert_eq!(config.project_root().unwrap(), temp.path());
        assert_eq!(
            config.history_dir().unwrap(),
            temp.path().join("state/history")
        );
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("taskout.toml");
        fs::write(&path, "[history\n").unwrap();

        let err = TaskoutConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_apply_task() {
        let config: TaskoutConfig = toml::from_str(
            r#"
[tasks.build]
cacheable = true
outputs = [{ name = "dist", paths = ["dist", "dist-extra"] }]
"#,
        )
        .unwrap();

        let mut builder = TaskOutputs::builder("build", "/work");
        assert!(config.apply_task("build", &mut builder).unwrap());
        let outputs = builder.build(Arc::new(HistoryStore::in_memory()));

        assert_eq!(outputs.property_output("dist").unwrap().locations.len(), 2);
        assert!(outputs.cache_decision().allowed);

        let mut other = TaskOutputs::builder("lint", "/work");
        assert!(!config.apply_task("lint", &mut other).unwrap());
    }
}
