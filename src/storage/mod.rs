pub mod archive;
pub mod cache_dir;
pub mod directory;

pub use archive::{pack_outputs, unpack_outputs, ArchiveManifest};
pub use cache_dir::default_cache_dir;
pub use directory::DirectoryBuildCache;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Key-value store for packed task outputs
///
/// Only consulted when the task's cache decision allows it.
pub trait BuildCacheStore: Send + Sync {
    /// Retrieve a blob by key
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a blob under a key, replacing any previous blob
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Check if a blob exists
    fn contains(&self, key: &str) -> Result<bool>;

    /// Delete a blob. Returns whether it existed.
    fn remove(&self, key: &str) -> Result<bool>;
}

/// Derives the store key for a task from a caller supplied key.
///
/// The caller key stands for the task's inputs; mixing in the identity keeps
/// two tasks with the same inputs apart.
pub fn cache_key(task_identity: &str, input_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_identity.as_bytes());
    hasher.update([0u8]);
    hasher.update(input_key.as_bytes());
    hex::encode(hasher.finalize())
}
