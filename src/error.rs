//! Error types for output tracking.
//!
//! Only `DuplicateProperty` and `PropertyNotFound` are meant to stop the
//! caller. Every other variant is downgraded by the evaluator and the facade
//! to the conservative branch: execute the task, do not cache it.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OutputsError>;

#[derive(Error, Debug)]
pub enum OutputsError {
    /// Two outputs were declared under the same property name.
    #[error("output property '{name}' is already declared")]
    DuplicateProperty { name: String },

    /// A property name was looked up that the task never declared.
    #[error("no output property named '{name}'")]
    PropertyNotFound { name: String },

    /// A declared output exists but could not be read.
    #[error("failed to fingerprint {}: {source}", path.display())]
    FingerprintIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Fingerprinting was stopped through its cancellation flag.
    #[error("fingerprinting cancelled")]
    Cancelled,

    /// A persisted execution record could not be decoded.
    #[error("corrupt execution history in {entry}: {reason}")]
    HistoryCorrupt { entry: String, reason: String },

    /// The history backend failed to read or write.
    #[error("execution history I/O error at {}: {source}", path.display())]
    HistoryIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The build cache store failed to read or write.
    #[error("build cache I/O error at {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Packing or unpacking an output archive failed.
    #[error("output archive error: {0}")]
    Archive(String),
}

impl From<serde_json::Error> for OutputsError {
    fn from(err: serde_json::Error) -> Self {
        OutputsError::Serialization(err.to_string())
    }
}
