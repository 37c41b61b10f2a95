/// `taskout record` command implementation
///
/// Marks the current state of a task's outputs as the result of a successful
/// execution, e.g. after the task ran outside of taskout.
use anyhow::{Context, Result};
use std::sync::Arc;

use super::{close_history, Workspace};
use crate::cli::TaskArgs;
use crate::cli_utils::taskout_prefix;

pub fn run(args: &TaskArgs) -> Result<()> {
    let workspace = Workspace::load(&args.common)?;
    let history = workspace.open_history()?;
    let outputs = workspace.task_outputs(args, Arc::clone(&history))?;

    if !outputs.declares_output() {
        anyhow::bail!("Task {} declares no outputs, nothing to record", args.task);
    }

    outputs
        .after_execution(true)
        .with_context(|| format!("Failed to record outputs of {}", args.task))?;

    eprintln!(
        "{} Recorded {} output properties for {}",
        taskout_prefix(),
        outputs.property_outputs().len(),
        args.task
    );

    drop(outputs);
    close_history(history)
}
