/// `taskout history` command implementation
use anyhow::{Context, Result};

use super::{close_history, Workspace};
use crate::cli::{CommonConfigArgs, HistoryCommands};
use crate::cli_utils::taskout_prefix;

pub fn run(command: &HistoryCommands) -> Result<()> {
    match command {
        HistoryCommands::List { common } => list(common),
        HistoryCommands::Show { task, common } => show(task, common),
        HistoryCommands::Clear { task, all, common } => clear(task.as_deref(), *all, common),
    }
}

fn list(common: &CommonConfigArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;
    let history = workspace.open_history()?;

    let identities = history.identities();
    if identities.is_empty() {
        println!("No recorded executions");
    }
    for identity in &identities {
        if let Some(record) = history.load(identity) {
            println!(
                "{}  {}  ({} output properties)",
                record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                identity,
                record.fingerprints.len()
            );
        }
    }

    close_history(history)
}

fn show(task: &str, common: &CommonConfigArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;
    let history = workspace.open_history()?;

    let Some(record) = history.load(task) else {
        anyhow::bail!("No recorded execution for task {task}");
    };
    println!("{}", serde_json::to_string_pretty(record.as_ref())?);

    close_history(history)
}

fn clear(task: Option<&str>, all: bool, common: &CommonConfigArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;
    let history = workspace.open_history()?;

    if all {
        let removed = history.clear().context("Failed to clear execution history")?;
        eprintln!("{} Removed {} execution records", taskout_prefix(), removed);
    } else if let Some(task) = task {
        let removed = history
            .invalidate(task)
            .with_context(|| format!("Failed to clear history of {task}"))?;
        if removed {
            eprintln!("{} Removed execution record of {}", taskout_prefix(), task);
        } else {
            eprintln!("{} No execution record for {}", taskout_prefix(), task);
        }
    }

    close_history(history)
}
