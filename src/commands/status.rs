/// `taskout status` command implementation
use anyhow::Result;
use std::sync::Arc;

use super::{close_history, Workspace};
use crate::cli::TaskArgs;

pub fn run(args: &TaskArgs) -> Result<()> {
    let workspace = Workspace::load(&args.common)?;
    let history = workspace.open_history()?;
    let outputs = workspace.task_outputs(args, Arc::clone(&history))?;

    let evaluation = outputs.before_execution();
    let decision = outputs.cache_decision();

    println!("Task: {}", outputs.identity());
    match &evaluation.reason {
        None => println!("Up to date: yes"),
        Some(reason) => println!("Up to date: no ({reason})"),
    }

    if outputs.declares_output() {
        println!("Outputs:");
        for property in outputs.property_outputs() {
            let locations: Vec<String> = property
                .locations
                .iter()
                .map(|l| l.display().to_string())
                .collect();
            let flag = if property.cacheable { "" } else { " [non-cacheable]" };
            println!("  {}{}: {}", property.name, flag, locations.join(", "));
        }
    } else {
        println!("Outputs: none declared");
    }

    match &decision.reason {
        None => println!("Build cache: allowed"),
        Some(reason) => println!("Build cache: not allowed ({reason})"),
    }

    if let Some(record) = history.load(outputs.identity()) {
        println!(
            "Last recorded: {}",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    drop(outputs);
    close_history(history)
}
