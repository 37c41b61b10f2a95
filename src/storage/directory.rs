use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::BuildCacheStore;
use crate::error::{OutputsError, Result};

/// Build cache backed by a local directory
///
/// Layout: `<dir>/ab/abcdef...`, the first two characters of the key
/// select the subdirectory. Writes go through a temp file in the same
/// directory and are renamed into place.
pub struct DirectoryBuildCache {
    dir: PathBuf,
}

impl DirectoryBuildCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| OutputsError::CacheIo {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        if key.len() < 2 || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(OutputsError::CacheIo {
                path: self.dir.clone(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid cache key '{key}'"),
                ),
            });
        }
        Ok(self.dir.join(&key[..2]).join(key))
    }
}

impl BuildCacheStore for DirectoryBuildCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(OutputsError::CacheIo { path, source }),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.blob_path(key)?;
        let shard = path.parent().unwrap_or(self.dir.as_path()).to_path_buf();
        let io_err = |source| OutputsError::CacheIo {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&shard).map_err(io_err)?;
        let mut temp = tempfile::NamedTempFile::new_in(&shard).map_err(io_err)?;
        temp.write_all(data).map_err(io_err)?;
        temp.persist(&path).map_err(|e| io_err(e.error))?;

        debug!(key, size_bytes = data.len(), "stored blob");
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.blob_path(key)?.is_file())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(OutputsError::CacheIo { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get() {
        let temp = TempDir::new().unwrap();
        let cache = DirectoryBuildCache::new(temp.path()).unwrap();

        assert_eq!(cache.get("abcdef").unwrap(), None);
        cache.put("abcdef", b"blob").unwrap();

        assert_eq!(cache.get("abcdef").unwrap(), Some(b"blob".to_vec()));
        assert!(cache.contains("abcdef").unwrap());
        assert!(temp.path().join("ab").join("abcdef").is_file());
    }

    #[test]
    fn test_put_replaces() {
        let temp = TempDir::new().unwrap();
        let cache = DirectoryBuildCache::new(temp.path()).unwrap();

        cache.put("abcdef", b"one").unwrap();
        cache.put("abcdef", b"two").unwrap();
        assert_eq!(cache.get("abcdef").unwrap(), Some(b"two".to_vec()));

        let shard: Vec<_> = fs::read_dir(temp.path().join("ab")).unwrap().collect();
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let cache = DirectoryBuildCache::new(temp.path()).unwrap();

        cache.put("abcdef", b"blob").unwrap();
        assert!(cache.remove("abcdef").unwrap());
        assert!(!cache.remove("abcdef").unwrap());
        assert!(!cache.contains("abcdef").unwrap());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let temp = TempDir::new().unwrap();
        let cache = DirectoryBuildCache::new(temp.path()).unwrap();

        for key in ["", "a", "../escape", "ab/cd"] {
            assert!(matches!(
                cache.put(key, b"x"),
                Err(OutputsError::CacheIo { .. })
            ));
        }
    }
}
