use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::TaskoutConfig;

pub const CONFIG_FILE_NAME: &str = "taskout.toml";

/// Discovers taskout configuration by traversing up the directory tree
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            return Ok(Some(config_path));
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    // Fallback to global config
    if let Some(global_config) = global_config_path() {
        if global_config.is_file() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// Per-user configuration used when no project config is found
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/taskout/config.toml"))
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path.
/// Otherwise, auto-discovers config by traversing up directory tree from cwd.
///
/// Returns Ok(None) if no config is found (neither explicit nor discovered).
pub fn load_config_with_discovery(explicit_path: Option<&Path>) -> Result<Option<TaskoutConfig>> {
    if let Some(config_path) = explicit_path {
        return Ok(Some(TaskoutConfig::from_file(config_path)?));
    }

    let current_dir =
        std::env::current_dir().context("Failed to get current directory for config discovery")?;

    let Some(discovered_path) = discover_config(&current_dir)? else {
        return Ok(None);
    };

    let mut config = TaskoutConfig::from_file(&discovered_path)?;
    if global_config_path().as_deref() == Some(discovered_path.as_path()) {
        // Global settings apply to whichever project is current
        config.root = None;
    }
    Ok(Some(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discover_in_start_dir() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "").unwrap();

        assert_eq!(discover_config(temp.path()).unwrap(), Some(config_path));
    }

    #[test]
    fn test_discover_walks_up() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "").unwrap();

        let nested = temp.path().join("modules/app/src");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(discover_config(&nested).unwrap(), Some(config_path));
    }

    #[test]
    fn test_nearest_config_wins() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(CONFIG_FILE_NAME), "").unwrap();

        let module = temp.path().join("module");
        fs::create_dir_all(&module).unwrap();
        let nearest = module.join(CONFIG_FILE_NAME);
        fs::write(&nearest, "").unwrap();

        assert_eq!(discover_config(&module).unwrap(), Some(nearest));
    }

    #[test]
    fn test_directory_named_like_config_is_ignored() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(CONFIG_FILE_NAME)).unwrap();

        let found = discover_config(temp.path()).unwrap();
        assert_ne!(found, Some(temp.path().join(CONFIG_FILE_NAME)));
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("custom.toml");
        fs::write(&config_path, "[cache]\nenabled = false\n").unwrap();

        let config = load_config_with_discovery(Some(&config_path))
            .unwrap()
            .unwrap();
        assert!(!config.cache.enabled);
    }
}
