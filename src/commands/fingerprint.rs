/// `taskout fingerprint` command implementation
use anyhow::{Context, Result};

use super::Workspace;
use crate::cli::FingerprintArgs;

pub fn run(args: &FingerprintArgs) -> Result<()> {
    let workspace = Workspace::load(&args.common)?;
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    let mut fingerprinter = workspace.config.fingerprinter(&cwd)?;
    if let Some(method) = args.method {
        fingerprinter = fingerprinter.with_method(method);
    }

    let fingerprint = fingerprinter
        .fingerprint(&args.paths)
        .context("Failed to fingerprint paths")?;

    println!("{}", serde_json::to_string_pretty(&fingerprint)?);
    Ok(())
}
