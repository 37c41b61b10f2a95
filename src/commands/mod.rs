pub mod config;
pub mod fingerprint;
pub mod history;
pub mod record;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::cli::{CommonConfigArgs, TaskArgs};
use taskout::config::TaskoutConfig;
use taskout::config_discovery::load_config_with_discovery;
use taskout::outputs::{FileHistoryBackend, HistoryStore, TaskOutputs};
use taskout::storage::DirectoryBuildCache;

/// Configuration resolved for one invocation
pub struct Workspace {
    pub config: TaskoutConfig,
    /// Directory task outputs are resolved against
    pub base_dir: PathBuf,
    pub history_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Workspace {
    /// Loads (or discovers) the config and applies command line overrides.
    pub fn load(args: &CommonConfigArgs) -> Result<Self> {
        let config = match load_config_with_discovery(args.config.as_deref())? {
            Some(config) => config,
            None => {
                debug!("no configuration file found, using defaults");
                TaskoutConfig::default()
            }
        };
        config.validate().context("Invalid configuration")?;

        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let base_dir = config.project_root()?;
        let history_dir = match &args.history_dir {
            Some(dir) => cwd.join(dir),
            None => config.history_dir()?,
        };
        let cache_dir = match &args.cache_dir {
            Some(dir) => cwd.join(dir),
            None => config.cache_dir()?,
        };

        Ok(Self {
            config,
            base_dir,
            history_dir,
            cache_dir,
        })
    }

    pub fn open_history(&self) -> Result<Arc<HistoryStore>> {
        let backend = FileHistoryBackend::new(&self.history_dir).with_context(|| {
            format!(
                "Failed to open history directory: {}",
                self.history_dir.display()
            )
        })?;
        let store = HistoryStore::open(backend).context("Failed to load execution history")?;
        Ok(Arc::new(store))
    }

    /// The local build cache, unless disabled in the config.
    pub fn open_cache(&self) -> Result<Option<DirectoryBuildCache>> {
        if !self.config.cache.enabled {
            return Ok(None);
        }
        let cache = DirectoryBuildCache::new(&self.cache_dir).with_context(|| {
            format!("Failed to open build cache: {}", self.cache_dir.display())
        })?;
        Ok(Some(cache))
    }

    /// Builds the output tracking for a task from the config and the
    /// ad hoc `--output` flags.
    pub fn task_outputs(&self, args: &TaskArgs, history: Arc<HistoryStore>) -> Result<TaskOutputs> {
        let mut builder = TaskOutputs::builder(args.task.as_str(), self.base_dir.as_path());
        let configured = self.config.apply_task(&args.task, &mut builder)?;

        let mut ad_hoc = Vec::new();
        for spec in &args.outputs {
            let (name, paths) = parse_output_flag(spec)?;
            let cacheable = !args.non_cacheable.contains(&name);
            builder
                .declare(&name, &paths, cacheable)
                .with_context(|| format!("Invalid --output {spec}"))?;
            ad_hoc.push(name);
        }

        for name in &args.non_cacheable {
            if !ad_hoc.contains(name) {
                anyhow::bail!("--non-cacheable {name} does not match any --output");
            }
        }

        if args.cacheable {
            builder.cacheable(true);
        }
        builder.fingerprinter(self.config.fingerprinter(&self.base_dir)?);

        debug!(
            task = %args.task,
            configured,
            ad_hoc_outputs = ad_hoc.len(),
            "resolved task outputs"
        );
        Ok(builder.build(history))
    }
}

/// Flushes the history backend once every task handle is gone.
pub fn close_history(history: Arc<HistoryStore>) -> Result<()> {
    match Arc::try_unwrap(history) {
        Ok(store) => store.close().context("Failed to flush execution history"),
        Err(_) => Ok(()),
    }
}

/// Parses `name=path[,path...]`.
fn parse_output_flag(spec: &str) -> Result<(String, Vec<String>)> {
    let Some((name, paths)) = spec.split_once('=') else {
        anyhow::bail!("Invalid --output '{spec}', expected NAME=PATH[,PATH...]");
    };
    let name = name.trim();
    let paths: Vec<String> = paths
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect();

    if name.is_empty() || paths.is_empty() {
        anyhow::bail!("Invalid --output '{spec}', expected NAME=PATH[,PATH...]");
    }
    Ok((name.to_string(), paths))
}
