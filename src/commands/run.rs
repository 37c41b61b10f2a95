/// `taskout run` command implementation
///
/// Acts as the scheduler for a single task: skip when up to date, restore
/// from the build cache when possible, otherwise execute and record.
use anyhow::{Context, Result};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::{close_history, Workspace};
use crate::cli::RunArgs;
use crate::cli_utils::taskout_prefix;
use taskout::logging::{operations, status};
use taskout::outputs::TaskOutputs;
use taskout::storage::{
    cache_key, pack_outputs, unpack_outputs, ArchiveManifest, BuildCacheStore,
};

pub fn run(args: &RunArgs) -> Result<()> {
    let workspace = Workspace::load(&args.task.common)?;
    let history = workspace.open_history()?;
    let outputs = workspace.task_outputs(&args.task, Arc::clone(&history))?;
    let task = outputs.identity().to_string();

    let evaluation = outputs.before_execution();
    if evaluation.up_to_date && !args.rerun {
        eprintln!("{} {} is up to date", taskout_prefix(), task);
        drop(outputs);
        return close_history(history);
    }
    if let Some(reason) = &evaluation.reason {
        eprintln!("{} {} must run: {}", taskout_prefix(), task, reason);
    }

    let decision = outputs.cache_decision();
    let cache = match (&args.cache_key, args.no_cache) {
        (Some(input_key), false) if decision.allowed => workspace
            .open_cache()?
            .map(|store| (cache_key(&task, input_key), store)),
        (Some(_), false) => {
            if let Some(reason) = &decision.reason {
                eprintln!("{} Build cache not used: {}", taskout_prefix(), reason);
            }
            None
        }
        _ => None,
    };

    if let Some((key, store)) = &cache {
        if restore(&outputs, store, key)? {
            outputs
                .after_execution(true)
                .context("Failed to record restored outputs")?;
            eprintln!("{} {} restored from build cache", taskout_prefix(), task);
            drop(outputs);
            return close_history(history);
        }
    }

    let start = Instant::now();
    let exit = execute(&args.command, &workspace)?;
    let duration = start.elapsed();

    if !exit.success() {
        outputs.after_execution(false)?;
        let code = exit.code().unwrap_or(1);
        eprintln!(
            "{} {} failed after {:.2}s (exit: {})",
            taskout_prefix(),
            task,
            duration.as_secs_f64(),
            code
        );
        drop(outputs);
        close_history(history)?;
        std::process::exit(code);
    }

    outputs
        .after_execution(true)
        .context("Failed to record task outputs")?;
    eprintln!(
        "{} {} completed in {:.2}s",
        taskout_prefix(),
        task,
        duration.as_secs_f64()
    );

    if let Some((key, store)) = &cache {
        if let Err(e) = store_outputs(&outputs, store, key) {
            warn!(
                operation = operations::CACHE_PUT,
                status = status::ERROR,
                task = %task,
                error = %e,
                "failed to store outputs in build cache"
            );
        }
    }

    drop(outputs);
    close_history(history)
}

fn execute(command: &[String], workspace: &Workspace) -> Result<ExitStatus> {
    let Some((program, rest)) = command.split_first() else {
        anyhow::bail!("No command given");
    };

    info!(
        operation = operations::EXECUTE,
        program = %program,
        "executing task command"
    );

    Command::new(program)
        .args(rest)
        .current_dir(&workspace.base_dir)
        .status()
        .with_context(|| format!("Failed to execute {program}"))
}

/// Restores outputs from the cache. Returns false on a miss or when the
/// restored outputs do not match what was packed.
fn restore(outputs: &TaskOutputs, store: &dyn BuildCacheStore, key: &str) -> Result<bool> {
    let Some(blob) = store.get(key).context("Failed to read build cache")? else {
        info!(
            operation = operations::CACHE_GET,
            status = status::MISS,
            task = outputs.identity(),
            "build cache miss"
        );
        return Ok(false);
    };

    let manifest = match unpack_outputs(&blob, outputs.base_dir()) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(
                operation = operations::CACHE_GET,
                status = status::ERROR,
                task = outputs.identity(),
                error = %e,
                "could not restore cached outputs, executing instead"
            );
            return Ok(false);
        }
    };

    if !matches_manifest(outputs, &manifest) {
        return Ok(false);
    }

    info!(
        operation = operations::CACHE_GET,
        status = status::HIT,
        task = outputs.identity(),
        "restored outputs from build cache"
    );
    Ok(true)
}

/// Whether the outputs now on disk are the ones the cache entry was packed
/// from. Any failure to fingerprint them counts as a mismatch.
fn matches_manifest(outputs: &TaskOutputs, manifest: &ArchiveManifest) -> bool {
    let restored = match outputs.cache_payload() {
        Ok(payload) => payload
            .map(|payload| payload.key_material())
            .unwrap_or_default(),
        Err(e) => {
            warn!(
                operation = operations::CACHE_GET,
                status = status::ERROR,
                task = outputs.identity(),
                error = %e,
                "could not fingerprint restored outputs, executing instead"
            );
            return false;
        }
    };

    if restored != manifest.key_material {
        warn!(
            operation = operations::CACHE_GET,
            status = status::ERROR,
            task = outputs.identity(),
            "restored outputs differ from the cached entry, executing instead"
        );
        return false;
    }
    true
}

fn store_outputs(outputs: &TaskOutputs, store: &dyn BuildCacheStore, key: &str) -> Result<()> {
    let Some(payload) = outputs.cache_payload()? else {
        return Ok(());
    };
    let blob = pack_outputs(&payload, outputs.base_dir())?;
    store.put(key, &blob)?;

    info!(
        operation = operations::CACHE_PUT,
        status = status::SUCCESS,
        task = outputs.identity(),
        size_bytes = blob.len(),
        "stored outputs in build cache"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::AtomicBool;
    use taskout::outputs::{Fingerprinter, HistoryStore};
    use tempfile::TempDir;

    fn cacheable_task(project: &std::path::Path, fingerprinter: Fingerprinter) -> TaskOutputs {
        let mut builder = TaskOutputs::builder(":assemble", project);
        builder
            .declare("dist", ["dist"], true)
            .unwrap()
            .cacheable(true)
            .fingerprinter(fingerprinter);
        builder.build(Arc::new(HistoryStore::in_memory()))
    }

    #[test]
    fn test_restored_outputs_match_manifest() {
        let project = TempDir::new().unwrap();
        fs::create_dir_all(project.path().join("dist")).unwrap();
        fs::write(project.path().join("dist/app.js"), "bundle").unwrap();
        let task = cacheable_task(project.path(), Fingerprinter::new(project.path()));

        let blob = pack_outputs(&task.cache_payload().unwrap().unwrap(), project.path()).unwrap();
        let manifest = unpack_outputs(&blob, project.path()).unwrap();
        assert!(matches_manifest(&task, &manifest));

        fs::write(project.path().join("dist/app.js"), "other").unwrap();
        assert!(!matches_manifest(&task, &manifest));
    }

    #[test]
    fn test_unfingerprintable_restore_is_a_miss() {
        let project = TempDir::new().unwrap();
        fs::create_dir_all(project.path().join("dist")).unwrap();
        fs::write(project.path().join("dist/app.js"), "bundle").unwrap();
        let task = cacheable_task(project.path(), Fingerprinter::new(project.path()));
        let blob = pack_outputs(&task.cache_payload().unwrap().unwrap(), project.path()).unwrap();

        let cancelled = Fingerprinter::new(project.path())
            .with_cancellation(Arc::new(AtomicBool::new(true)));
        let task = cacheable_task(project.path(), cancelled);
        let manifest = unpack_outputs(&blob, project.path()).unwrap();
        assert!(!matches_manifest(&task, &manifest));
    }
}
