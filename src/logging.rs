//! Structured logging for taskout
//!
//! Every event carries structured fields so runs can be grepped or shipped to
//! a log aggregator without parsing free text.
//!
//! # Log Format Conventions
//!
//! - `operation`: what was being done (e.g. "fingerprint", "history.save")
//! - `status`: the outcome ("success", "up_to_date", "miss", "error")
//! - `task`: identity of the task the event belongs to
//! - `key`: build cache key, hex-encoded
//!
//! # Examples
//!
//! ```rust
//! use taskout::logging::{operations, status};
//! use tracing::info;
//!
//! info!(
//!     operation = operations::CACHE_GET,
//!     status = status::HIT,
//!     task = ":compileJava",
//!     "restored outputs from build cache"
//! );
//! ```

use std::io::{self, IsTerminal};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored on a terminal
    Pretty,
    /// Same layout without colors, for CI
    Compact,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Reads `TASKOUT_LOG_FORMAT`, falling back to compact when `CI` is set.
    pub fn from_env() -> Self {
        match std::env::var("TASKOUT_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => {
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            }
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Logs go to stderr so command output on stdout stays machine readable.
///
/// # Environment Variables
///
/// - `RUST_LOG`: log level filter, `info` when unset or invalid
/// - `TASKOUT_LOG_FORMAT`: "pretty", "compact" or "json"
/// - `CI`: if set, defaults to compact format
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match LogFormat::from_env() {
        LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(false)
                        .with_writer(io::stderr)
                        .json(),
                )
                .init();
        }
        format => {
            let ansi = format == LogFormat::Pretty && io::stderr().is_terminal();
            registry
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(ansi)
                        .with_writer(io::stderr),
                )
                .init();
        }
    }
}

/// Operation names for consistent logging
pub mod operations {
    pub const FINGERPRINT: &str = "fingerprint";
    pub const UP_TO_DATE: &str = "up_to_date";
    pub const LOAD: &str = "history.load";
    pub const SAVE: &str = "history.save";
    pub const INVALIDATE: &str = "history.invalidate";
    pub const CACHE_GET: &str = "cache.get";
    pub const CACHE_PUT: &str = "cache.put";
    pub const EXECUTE: &str = "execute";
}

/// Status values for consistent logging
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const SKIPPED: &str = "skipped";
    pub const CORRUPT: &str = "corrupt";
    pub const UP_TO_DATE: &str = "up_to_date";
    pub const OUT_OF_DATE: &str = "out_of_date";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn with_env<F: FnOnce()>(format: Option<&str>, ci: Option<&str>, f: F) {
        let old_format = std::env::var("TASKOUT_LOG_FORMAT").ok();
        let old_ci = std::env::var("CI").ok();

        match format {
            Some(v) => std::env::set_var("TASKOUT_LOG_FORMAT", v),
            None => std::env::remove_var("TASKOUT_LOG_FORMAT"),
        }
        match ci {
            Some(v) => std::env::set_var("CI", v),
            None => std::env::remove_var("CI"),
        }

        f();

        match old_format {
            Some(v) => std::env::set_var("TASKOUT_LOG_FORMAT", v),
            None => std::env::remove_var("TASKOUT_LOG_FORMAT"),
        }
        match old_ci {
            Some(v) => std::env::set_var("CI", v),
            None => std::env::remove_var("CI"),
        }
    }

    #[test]
    #[serial]
    fn test_explicit_format() {
        with_env(Some("JSON"), None, || {
            assert_eq!(LogFormat::from_env(), LogFormat::Json);
        });
        with_env(Some("compact"), None, || {
            assert_eq!(LogFormat::from_env(), LogFormat::Compact);
        });
        with_env(Some("pretty"), Some("true"), || {
            assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
        });
    }

    #[test]
    #[serial]
    fn test_default_format_depends_on_ci() {
        with_env(None, None, || {
            assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
        });
        with_env(Some("bogus"), Some("true"), || {
            assert_eq!(LogFormat::from_env(), LogFormat::Compact);
        });
    }
}
