use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use taskout::outputs::HashMethod;

/// taskout - incremental task output tracking
///
/// Skips a command when the outputs it produced last time are still on disk
/// unchanged, and restores them from a local build cache when they are not.
#[derive(Parser, Debug)]
#[command(name = "taskout")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incremental task output tracking", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Common configuration arguments shared across commands
#[derive(Args, Debug, Clone, Default)]
pub struct CommonConfigArgs {
    /// Config file path (discovered from the working directory when omitted)
    #[arg(short = 'c', long, env = "TASKOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Execution history directory
    #[arg(long, env = "TASKOUT_HISTORY_DIR")]
    pub history_dir: Option<PathBuf>,

    /// Local build cache directory
    #[arg(long, env = "TASKOUT_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Identifies a task and its declared outputs
#[derive(Args, Debug, Clone)]
pub struct TaskArgs {
    /// Task identity, e.g. ":app:compileJava"
    pub task: String,

    /// Declare an output property (repeatable)
    #[arg(long = "output", value_name = "NAME=PATH[,PATH...]")]
    pub outputs: Vec<String>,

    /// Mark an output declared with --output as non-cacheable (repeatable)
    #[arg(long = "non-cacheable", value_name = "NAME")]
    pub non_cacheable: Vec<String>,

    /// Opt the task into the build cache
    #[arg(long)]
    pub cacheable: bool,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command unless its outputs are up to date
    Run(RunArgs),

    /// Show whether a task is up to date and cacheable
    Status(TaskArgs),

    /// Record the current outputs as a successful execution
    Record(TaskArgs),

    /// Print the fingerprint of a set of paths as JSON
    Fingerprint(FingerprintArgs),

    /// Inspect or clear execution history
    History(HistoryArgs),

    /// Configuration management utilities
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Key describing the task's inputs; enables build cache lookups
    #[arg(long, env = "TASKOUT_CACHE_KEY")]
    pub cache_key: Option<String>,

    /// Execute even if the outputs are up to date
    #[arg(long)]
    pub rerun: bool,

    /// Do not read from or write to the build cache
    #[arg(long)]
    pub no_cache: bool,

    /// Command to execute (after --)
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct FingerprintArgs {
    /// Paths to fingerprint, relative to the working directory
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Hash method (content, mtime); the configured method when omitted
    #[arg(long)]
    pub method: Option<HashMethod>,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[command(subcommand)]
    pub command: HistoryCommands,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    /// List tasks with recorded executions
    List {
        #[command(flatten)]
        common: CommonConfigArgs,
    },
    /// Show the recorded execution of a task as JSON
    Show {
        task: String,

        #[command(flatten)]
        common: CommonConfigArgs,
    },
    /// Forget recorded executions
    Clear {
        /// Task to forget
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        task: Option<String>,

        /// Forget every task
        #[arg(long)]
        all: bool,

        #[command(flatten)]
        common: CommonConfigArgs,
    },
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print an example config file
    Example,
    /// Validate configuration file
    Validate {
        /// Path to config file (discovered when omitted)
        path: Option<PathBuf>,
    },
    /// Show effective configuration
    Show {
        #[command(flatten)]
        common: CommonConfigArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "taskout",
            "run",
            ":compile",
            "--output",
            "classes=build/classes",
            "--cacheable",
            "--cache-key",
            "abc",
            "--",
            "make",
            "all",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.task.task, ":compile");
        assert_eq!(args.task.outputs, vec!["classes=build/classes"]);
        assert!(args.task.cacheable);
        assert_eq!(args.cache_key.as_deref(), Some("abc"));
        assert_eq!(args.command, vec!["make", "all"]);
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Cli::try_parse_from(["taskout", "run", ":compile"]).is_err());
    }

    #[test]
    fn test_history_clear_needs_target() {
        assert!(Cli::try_parse_from(["taskout", "history", "clear"]).is_err());
        assert!(Cli::try_parse_from(["taskout", "history", "clear", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["taskout", "history", "clear", ":a", "--all"]).is_err());
    }

    #[test]
    fn test_fingerprint_method() {
        let cli =
            Cli::try_parse_from(["taskout", "fingerprint", "out", "--method", "mtime"]).unwrap();
        let Commands::Fingerprint(args) = cli.command else {
            panic!("expected fingerprint");
        };
        assert_eq!(args.method, Some(HashMethod::Mtime));
    }
}
