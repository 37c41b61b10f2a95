// Library interface for taskout
// The binary and integration tests use these modules; build tools can embed
// `outputs` directly.

pub mod config;
pub mod config_discovery;
pub mod error;
pub mod logging;
pub mod outputs;
pub mod storage;

// Re-export commonly used types
pub use error::{OutputsError, Result};
pub use outputs::{HistoryStore, TaskOutputs, TaskOutputsBuilder};
pub use storage::{BuildCacheStore, DirectoryBuildCache};
