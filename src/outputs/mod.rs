//! Task output tracking
//!
//! [`TaskOutputs`] is what a scheduler talks to: call
//! [`before_execution`](TaskOutputs::before_execution) to decide whether the
//! task body can be skipped, [`after_execution`](TaskOutputs::after_execution)
//! once it ran, and [`cache_decision`](TaskOutputs::cache_decision) to find out
//! whether a build cache round trip is permitted.
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskout::outputs::{HistoryStore, TaskOutputs};
//!
//! # fn main() -> taskout::Result<()> {
//! let history = Arc::new(HistoryStore::in_memory());
//! let mut builder = TaskOutputs::builder(":compileJava", "/work/project");
//! builder.declare("classes", ["build/classes"], true)?.cacheable(true);
//! let outputs = builder.build(Arc::clone(&history));
//!
//! if !outputs.before_execution().up_to_date {
//!     // run the task body
//!     outputs.after_execution(true)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache_policy;
pub mod fingerprint;
pub mod history;
pub mod registry;
pub mod up_to_date;

pub use cache_policy::{CacheDecision, CacheDisabledReason, CachePolicy};
pub use fingerprint::{ContentHash, Fingerprint, Fingerprinter, HashMethod, Snapshot};
pub use history::{
    ExecutionRecord, FileHistoryBackend, HistoryBackend, HistoryStore, MemoryHistoryBackend,
    RawRecord,
};
pub use registry::{OutputRegistry, PropertyOutput};
pub use up_to_date::{
    AllOf, Evaluation, OutOfDateReason, TaskState, UpToDateEvaluator, UpToDateSpec,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::logging::{operations, status};

/// Declaration phase of a task's outputs
///
/// Consumed by [`build`](TaskOutputsBuilder::build); declarations cannot
/// change afterwards.
pub struct TaskOutputsBuilder {
    identity: String,
    base_dir: PathBuf,
    registry: OutputRegistry,
    specs: AllOf,
    cacheable: bool,
    fingerprinter: Option<Fingerprinter>,
}

impl TaskOutputsBuilder {
    pub fn declare<I, P>(&mut self, name: &str, locations: I, cacheable: bool) -> Result<&mut Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.registry.declare(name, locations, cacheable)?;
        Ok(self)
    }

    /// Marks the task as opting into the build cache.
    pub fn cacheable(&mut self, cacheable: bool) -> &mut Self {
        self.cacheable = cacheable;
        self
    }

    /// Adds a condition that must hold for the task to be up to date.
    pub fn up_to_date_when<S: UpToDateSpec + 'static>(&mut self, spec: S) -> &mut Self {
        self.specs.push(Box::new(spec));
        self
    }

    /// Replaces the default content fingerprinter rooted at the base directory.
    pub fn fingerprinter(&mut self, fingerprinter: Fingerprinter) -> &mut Self {
        self.fingerprinter = Some(fingerprinter);
        self
    }

    pub fn build(self, history: Arc<HistoryStore>) -> TaskOutputs {
        let fingerprinter = self
            .fingerprinter
            .unwrap_or_else(|| Fingerprinter::new(self.base_dir.clone()));

        TaskOutputs {
            identity: self.identity,
            base_dir: self.base_dir,
            registry: self.registry,
            specs: self.specs,
            cacheable: self.cacheable,
            evaluator: UpToDateEvaluator::new(fingerprinter),
            history,
        }
    }
}

/// Cache key material and payload of a cacheable task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePayload {
    pub task_identity: String,
    pub properties: Vec<CachedProperty>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProperty {
    pub name: String,
    pub fingerprint: Fingerprint,
    pub locations: Vec<PathBuf>,
}

impl CachePayload {
    /// Digest over the identity and every property fingerprint.
    pub fn key_material(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.task_identity.as_bytes());
        for property in &self.properties {
            hasher.update([0u8]);
            hasher.update(property.name.as_bytes());
            for (path, snapshot) in &property.fingerprint.entries {
                hasher.update([0u8]);
                hasher.update(path.as_bytes());
                match snapshot {
                    Snapshot::File { hash } | Snapshot::Directory { hash, .. } => {
                        hasher.update(hash.as_bytes())
                    }
                    Snapshot::Absent => hasher.update(b"<absent>"),
                }
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// Output tracking for one task
pub struct TaskOutputs {
    identity: String,
    base_dir: PathBuf,
    registry: OutputRegistry,
    specs: AllOf,
    cacheable: bool,
    evaluator: UpToDateEvaluator,
    history: Arc<HistoryStore>,
}

impl TaskOutputs {
    pub fn builder<S: Into<String>, P: Into<PathBuf>>(identity: S, base_dir: P) -> TaskOutputsBuilder {
        TaskOutputsBuilder {
            identity: identity.into(),
            base_dir: base_dir.into(),
            registry: OutputRegistry::new(),
            specs: AllOf::new(),
            cacheable: false,
            fingerprinter: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn declares_output(&self) -> bool {
        self.registry.declares_output()
    }

    pub fn property_outputs(&self) -> &[PropertyOutput] {
        self.registry.all()
    }

    pub fn property_output(&self, name: &str) -> Result<&PropertyOutput> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &OutputRegistry {
        &self.registry
    }

    /// Decides whether the task body can be skipped.
    ///
    /// When `up_to_date` is true the scheduler must leave existing outputs
    /// in place and not run the task.
    pub fn before_execution(&self) -> Evaluation {
        self.evaluator
            .evaluate(&self.identity, &self.registry, &self.history, &self.specs)
    }

    /// Records the outcome of running the task body.
    ///
    /// A failed run leaves the previous record alone. After a successful run
    /// the outputs are fingerprinted and saved; if that fails the previous
    /// record is dropped so the next build executes the task again.
    pub fn after_execution(&self, succeeded: bool) -> Result<()> {
        if !succeeded {
            debug!(
                operation = operations::SAVE,
                status = status::SKIPPED,
                task = %self.identity,
                "task failed, keeping previous execution history"
            );
            return Ok(());
        }

        match self.current_fingerprints() {
            Ok(fingerprints) => {
                self.history.save(&self.identity, fingerprints)?;
                Ok(())
            }
            Err(e) => {
                warn!(
                    operation = operations::SAVE,
                    status = status::ERROR,
                    task = %self.identity,
                    error = %e,
                    "could not fingerprint outputs, dropping execution history"
                );
                self.history.invalidate(&self.identity)?;
                Err(e)
            }
        }
    }

    pub fn cache_decision(&self) -> CacheDecision {
        CachePolicy::evaluate(self.cacheable, &self.registry)
    }

    /// Key material and payload for the build cache, when caching is allowed.
    pub fn cache_payload(&self) -> Result<Option<CachePayload>> {
        if !self.cache_decision().allowed {
            return Ok(None);
        }

        let mut fingerprints = self.current_fingerprints()?;
        let properties = self
            .registry
            .all()
            .iter()
            .map(|property| CachedProperty {
                name: property.name.clone(),
                fingerprint: fingerprints
                    .remove(&property.name)
                    .unwrap_or_else(|| Fingerprint {
                        method: self.evaluator.fingerprinter().method(),
                        entries: BTreeMap::new(),
                    }),
                locations: property.locations.iter().cloned().collect(),
            })
            .collect();

        Ok(Some(CachePayload {
            task_identity: self.identity.clone(),
            properties,
        }))
    }

    /// Files produced by the last successful execution.
    pub fn previous_files(&self) -> Vec<PathBuf> {
        let Some(record) = self.history.load(&self.identity) else {
            return Vec::new();
        };
        let base = self.evaluator.fingerprinter().base_dir();
        let mut files: Vec<PathBuf> = record
            .fingerprints
            .values()
            .flat_map(|fingerprint| fingerprint.files(base))
            .collect();
        files.sort();
        files.dedup();
        files
    }

    fn current_fingerprints(&self) -> Result<BTreeMap<String, Fingerprint>> {
        let fingerprinter = self.evaluator.fingerprinter();
        self.registry
            .all()
            .iter()
            .map(|property| {
                Ok((
                    property.name.clone(),
                    fingerprinter.fingerprint(&property.locations)?,
                ))
            })
            .collect()
    }
}
