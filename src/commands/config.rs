use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::Workspace;
use crate::cli::{CommonConfigArgs, ConfigCommands};
use taskout::config::TaskoutConfig;
use taskout::config_discovery::discover_config;

pub fn run(command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Example => example(),
        ConfigCommands::Validate { path } => validate(path.as_deref()),
        ConfigCommands::Show { common } => show(common),
    }
}

fn example() -> Result<()> {
    println!("{}", TaskoutConfig::example()?);
    Ok(())
}

fn validate(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            discover_config(&cwd)?.context("No taskout.toml found")?
        }
    };
    info!("Validating config file: {}", path.display());

    let config = TaskoutConfig::from_file(&path)?;
    config.validate()?;

    println!("✓ Configuration file is valid: {}", path.display());
    println!("\nSummary:");
    println!("  - History directory: {}", config.history_dir()?.display());
    println!("  - Cache directory: {}", config.cache_dir()?.display());
    println!("  - Cache enabled: {}", config.cache.enabled);
    println!("  - Hash method: {}", config.fingerprint.method);
    println!("  - Tasks: {}", config.tasks.len());

    for (identity, task) in &config.tasks {
        let names: Vec<&str> = task.outputs.iter().map(|o| o.name.as_str()).collect();
        println!(
            "    {} (cacheable: {}) outputs: {}",
            identity,
            task.cacheable,
            names.join(", ")
        );
    }

    Ok(())
}

fn show(common: &CommonConfigArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;

    println!("Effective Configuration:\n");
    println!("# project root: {}", workspace.base_dir.display());
    println!("# history dir: {}", workspace.history_dir.display());
    println!("# cache dir: {}", workspace.cache_dir.display());
    println!("{}", toml::to_string_pretty(&workspace.config)?);

    Ok(())
}
