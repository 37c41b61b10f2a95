/// Up-to-date evaluation
///
/// A task may be skipped only when it declares outputs, has a recorded
/// successful execution, every declared property still fingerprints the same,
/// and every task-supplied spec agrees. Any failure along the way answers
/// "not up to date".
use std::fmt;
use tracing::{debug, info, warn};

use super::fingerprint::Fingerprinter;
use super::history::{ExecutionRecord, HistoryStore};
use super::registry::OutputRegistry;
use crate::error::OutputsError;
use crate::logging::{operations, status};

/// What a custom up-to-date spec gets to look at
#[derive(Debug, Clone, Copy)]
pub struct TaskState<'a> {
    pub identity: &'a str,
    pub outputs: &'a OutputRegistry,
    pub previous: Option<&'a ExecutionRecord>,
}

/// Extra condition a task author attaches to the up-to-date check
pub trait UpToDateSpec: Send + Sync {
    fn evaluate(&self, task: &TaskState<'_>) -> bool;
}

impl<F> UpToDateSpec for F
where
    F: Fn(&TaskState<'_>) -> bool + Send + Sync,
{
    fn evaluate(&self, task: &TaskState<'_>) -> bool {
        self(task)
    }
}

/// Conjunction of specs. Empty means "always".
#[derive(Default)]
pub struct AllOf(Vec<Box<dyn UpToDateSpec>>);

impl AllOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, spec: Box<dyn UpToDateSpec>) {
        self.0.push(spec);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl UpToDateSpec for AllOf {
    fn evaluate(&self, task: &TaskState<'_>) -> bool {
        self.0.iter().all(|spec| spec.evaluate(task))
    }
}

/// Why a task has to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutOfDateReason {
    NoOutputsDeclared,
    NoHistory,
    /// Declared now but absent from the last record.
    PropertyAdded(String),
    OutputsChanged {
        property: String,
        changes: Vec<String>,
    },
    /// Outputs could not be fingerprinted; the message is the underlying error.
    FingerprintFailed(String),
    UpToDateSpecRejected,
}

impl fmt::Display for OutOfDateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutOfDateReason::NoOutputsDeclared => f.write_str("task declares no outputs"),
            OutOfDateReason::NoHistory => f.write_str("no history of a previous execution"),
            OutOfDateReason::PropertyAdded(name) => {
                write!(f, "output property '{name}' was not part of the previous execution")
            }
            OutOfDateReason::OutputsChanged { property, changes } => {
                write!(f, "output property '{property}' changed")?;
                if !changes.is_empty() {
                    write!(f, ": {}", changes.join(", "))?;
                }
                Ok(())
            }
            OutOfDateReason::FingerprintFailed(error) => {
                write!(f, "could not fingerprint outputs: {error}")
            }
            OutOfDateReason::UpToDateSpecRejected => {
                f.write_str("task's up-to-date condition is not satisfied")
            }
        }
    }
}

/// Result of an up-to-date check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub up_to_date: bool,
    pub reason: Option<OutOfDateReason>,
}

impl Evaluation {
    pub fn up_to_date() -> Self {
        Self {
            up_to_date: true,
            reason: None,
        }
    }

    pub fn out_of_date(reason: OutOfDateReason) -> Self {
        Self {
            up_to_date: false,
            reason: Some(reason),
        }
    }
}

pub struct UpToDateEvaluator {
    fingerprinter: Fingerprinter,
}

impl UpToDateEvaluator {
    pub fn new(fingerprinter: Fingerprinter) -> Self {
        Self { fingerprinter }
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    /// Shorthand for `evaluate(..).up_to_date`.
    pub fn is_up_to_date(
        &self,
        task_identity: &str,
        registry: &OutputRegistry,
        history: &HistoryStore,
        spec: &dyn UpToDateSpec,
    ) -> bool {
        self.evaluate(task_identity, registry, history, spec)
            .up_to_date
    }

    pub fn evaluate(
        &self,
        task_identity: &str,
        registry: &OutputRegistry,
        history: &HistoryStore,
        spec: &dyn UpToDateSpec,
    ) -> Evaluation {
        let evaluation = self.compare(task_identity, registry, history, spec);

        match &evaluation.reason {
            None => info!(
                operation = operations::UP_TO_DATE,
                status = status::UP_TO_DATE,
                task = task_identity,
                "outputs are up to date"
            ),
            Some(reason) => debug!(
                operation = operations::UP_TO_DATE,
                status = status::OUT_OF_DATE,
                task = task_identity,
                reason = %reason,
                "task must execute"
            ),
        }

        evaluation
    }

    fn compare(
        &self,
        task_identity: &str,
        registry: &OutputRegistry,
        history: &HistoryStore,
        spec: &dyn UpToDateSpec,
    ) -> Evaluation {
        if !registry.declares_output() {
            return Evaluation::out_of_date(OutOfDateReason::NoOutputsDeclared);
        }

        let Some(previous) = history.load(task_identity) else {
            return Evaluation::out_of_date(OutOfDateReason::NoHistory);
        };

        for property in registry.all() {
            let Some(recorded) = previous.fingerprints.get(&property.name) else {
                return Evaluation::out_of_date(OutOfDateReason::PropertyAdded(
                    property.name.clone(),
                ));
            };

            let current = match self.fingerprinter.fingerprint(&property.locations) {
                Ok(current) => current,
                Err(e) => {
                    if !matches!(e, OutputsError::Cancelled) {
                        warn!(
                            operation = operations::FINGERPRINT,
                            status = status::ERROR,
                            task = task_identity,
                            property = %property.name,
                            error = %e,
                            "fingerprinting failed, task will execute"
                        );
                    }
                    return Evaluation::out_of_date(OutOfDateReason::FingerprintFailed(
                        e.to_string(),
                    ));
                }
            };

            if &current != recorded {
                return Evaluation::out_of_date(OutOfDateReason::OutputsChanged {
                    property: property.name.clone(),
                    changes: current.changes(recorded),
                });
            }
        }

        let state = TaskState {
            identity: task_identity,
            outputs: registry,
            previous: Some(previous.as_ref()),
        };
        if !spec.evaluate(&state) {
            return Evaluation::out_of_date(OutOfDateReason::UpToDateSpecRejected);
        }

        Evaluation::up_to_date()
    }
}
