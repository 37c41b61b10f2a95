// Common test utilities shared across acceptance tests
//
// Every test gets its own project directory and its own state directory for
// execution history and the build cache. HOME points into the state directory
// so a developer's ~/.config/taskout/config.toml never leaks into a test.

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestWorkspace {
    project: TempDir,
    state: TempDir,
}

#[allow(dead_code)]
impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            project: TempDir::new().unwrap(),
            state: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.project.path()
    }

    pub fn history_dir(&self) -> PathBuf {
        self.state.path().join("history")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.state.path().join("cache")
    }

    /// The taskout binary running inside the project directory
    pub fn taskout(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_taskout"));
        cmd.current_dir(self.path())
            .env("HOME", self.state.path())
            .env("TASKOUT_HISTORY_DIR", self.history_dir())
            .env("TASKOUT_CACHE_DIR", self.cache_dir())
            .env("TASKOUT_LOG_FORMAT", "compact")
            .env_remove("TASKOUT_CONFIG")
            .env_remove("TASKOUT_CACHE_KEY");
        cmd
    }

    pub fn create_file(&self, path: &str, content: &str) {
        let file_path = self.path().join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(file_path, content).unwrap();
    }

    /// Writes the per-user config under the test's HOME
    pub fn create_global_config(&self, content: &str) {
        let dir = self.state.path().join(".config/taskout");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.toml"), content).unwrap();
    }

    pub fn read_file(&self, path: &str) -> String {
        fs::read_to_string(self.path().join(path)).unwrap()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.path().join(path).exists()
    }

    pub fn remove(&self, path: &str) {
        let target = self.path().join(path);
        if target.is_dir() {
            fs::remove_dir_all(target).unwrap();
        } else {
            fs::remove_file(target).unwrap();
        }
    }

    /// Number of lines in `runs.log`, which the test commands append to
    pub fn run_count(&self) -> usize {
        fs::read_to_string(self.path().join("runs.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }
}
