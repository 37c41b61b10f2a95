/// Execution history: fingerprints recorded after each successful execution
///
/// The store keeps every record in memory and writes through to a pluggable
/// backend on each save. Backends deal in raw bytes keyed by task identity;
/// decoding (and treating undecodable records as absent) happens here.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::fingerprint::Fingerprint;
use crate::error::{OutputsError, Result};
use crate::logging::{operations, status};

/// Current on-disk record format. Records with another version are ignored.
pub const HISTORY_FORMAT_VERSION: u32 = 1;

/// Outcome of the last successful execution of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub format_version: u32,
    pub task_identity: String,
    /// Fingerprint per output property name.
    pub fingerprints: BTreeMap<String, Fingerprint>,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(task_identity: &str, fingerprints: BTreeMap<String, Fingerprint>) -> Self {
        Self {
            format_version: HISTORY_FORMAT_VERSION,
            task_identity: task_identity.to_string(),
            fingerprints,
            recorded_at: Utc::now(),
        }
    }

    fn decode(entry: &str, bytes: &[u8]) -> Result<Self> {
        let record: ExecutionRecord =
            serde_json::from_slice(bytes).map_err(|e| OutputsError::HistoryCorrupt {
                entry: entry.to_string(),
                reason: e.to_string(),
            })?;

        if record.format_version != HISTORY_FORMAT_VERSION {
            return Err(OutputsError::HistoryCorrupt {
                entry: entry.to_string(),
                reason: format!(
                    "format version {} (expected {})",
                    record.format_version, HISTORY_FORMAT_VERSION
                ),
            });
        }

        Ok(record)
    }
}

/// A stored entry as `(entry name, bytes)`. Reading a single entry may fail
/// without failing the whole listing.
pub type RawRecord = (String, Result<Vec<u8>>);

/// Persistence for execution records
///
/// A write for one identity must replace the whole record atomically.
pub trait HistoryBackend: Send + Sync {
    /// Reads every stored record.
    fn read_all(&self) -> Result<Vec<RawRecord>>;

    fn write(&self, identity: &str, bytes: &[u8]) -> Result<()>;

    fn remove(&self, identity: &str) -> Result<()>;

    /// Makes buffered writes durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// One JSON file per task identity
///
/// Layout: `<dir>/<sha256(identity)[..32]>.json`. Each write goes to a
/// temporary file in the same directory that is then renamed over the old
/// record.
pub struct FileHistoryBackend {
    dir: PathBuf,
}

impl FileHistoryBackend {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| OutputsError::HistoryIo {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, identity: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(identity.as_bytes()));
        self.dir.join(format!("{}.json", &digest[..32]))
    }
}

impl HistoryBackend for FileHistoryBackend {
    fn read_all(&self) -> Result<Vec<RawRecord>> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| OutputsError::HistoryIo { path, source }
        };

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err(&self.dir))? {
            let entry = entry.map_err(io_err(&self.dir))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).map_err(io_err(&path));
            records.push((entry.file_name().to_string_lossy().into_owned(), bytes));
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    fn write(&self, identity: &str, bytes: &[u8]) -> Result<()> {
        let path = self.record_path(identity);
        let io_err = |source| OutputsError::HistoryIo {
            path: path.clone(),
            source,
        };

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        temp.write_all(bytes).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn remove(&self, identity: &str) -> Result<()> {
        let path = self.record_path(identity);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(OutputsError::HistoryIo { path, source }),
        }
    }
}

/// In-memory backend for tests and throwaway builds
#[derive(Default)]
pub struct MemoryHistoryBackend {
    records: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryHistoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw bytes for an identity, bypassing encoding.
    pub fn insert_raw(&self, identity: &str, bytes: &[u8]) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(identity.to_string(), bytes.to_vec());
        }
    }

    fn poisoned() -> OutputsError {
        OutputsError::HistoryIo {
            path: PathBuf::from("<memory>"),
            source: std::io::Error::other("history lock poisoned"),
        }
    }
}

impl HistoryBackend for MemoryHistoryBackend {
    fn read_all(&self) -> Result<Vec<RawRecord>> {
        let records = self.records.lock().map_err(|_| Self::poisoned())?;
        Ok(records
            .iter()
            .map(|(identity, bytes)| (identity.clone(), Ok(bytes.clone())))
            .collect())
    }

    fn write(&self, identity: &str, bytes: &[u8]) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        records.insert(identity.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, identity: &str) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        records.remove(identity);
        Ok(())
    }
}

impl<B: HistoryBackend + ?Sized> HistoryBackend for Arc<B> {
    fn read_all(&self) -> Result<Vec<RawRecord>> {
        (**self).read_all()
    }

    fn write(&self, identity: &str, bytes: &[u8]) -> Result<()> {
        (**self).write(identity, bytes)
    }

    fn remove(&self, identity: &str) -> Result<()> {
        (**self).remove(identity)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

/// Process-wide execution history
///
/// Built once at build start with [`HistoryStore::open`] and closed at build
/// end with [`HistoryStore::close`]. Share it between tasks through `Arc`.
pub struct HistoryStore {
    backend: Box<dyn HistoryBackend>,
    records: RwLock<HashMap<String, Arc<ExecutionRecord>>>,
}

impl HistoryStore {
    /// Loads all records from `backend`.
    ///
    /// Records that cannot be read or decoded are skipped with a warning,
    /// which makes their tasks look like they never ran. Only failing to list
    /// the backend is an error.
    pub fn open<B: HistoryBackend + 'static>(backend: B) -> Result<Self> {
        let mut records = HashMap::new();
        let mut corrupt = 0usize;

        for (entry, bytes) in backend.read_all()? {
            match bytes.and_then(|bytes| ExecutionRecord::decode(&entry, &bytes)) {
                Ok(record) => {
                    records.insert(record.task_identity.clone(), Arc::new(record));
                }
                Err(e) => {
                    corrupt += 1;
                    warn!(
                        operation = operations::LOAD,
                        status = status::CORRUPT,
                        entry = %entry,
                        error = %e,
                        "ignoring unreadable execution record"
                    );
                }
            }
        }

        info!(
            operation = operations::LOAD,
            entry_count = records.len(),
            corrupt_count = corrupt,
            "loaded execution history"
        );

        Ok(Self {
            backend: Box::new(backend),
            records: RwLock::new(records),
        })
    }

    /// Opens an empty store that keeps records only in memory.
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryHistoryBackend::new()),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// The record of the last successful execution, if any.
    pub fn load(&self, task_identity: &str) -> Option<Arc<ExecutionRecord>> {
        let records = self.records.read().ok()?;
        records.get(task_identity).cloned()
    }

    /// Replaces the record for `task_identity`.
    ///
    /// The backend is written first; the in-memory view only changes once the
    /// new record is durable.
    pub fn save(
        &self,
        task_identity: &str,
        fingerprints: BTreeMap<String, Fingerprint>,
    ) -> Result<Arc<ExecutionRecord>> {
        let record = Arc::new(ExecutionRecord::new(task_identity, fingerprints));
        let bytes = serde_json::to_vec(record.as_ref())?;
        self.backend.write(task_identity, &bytes)?;

        self.records
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(task_identity.to_string(), Arc::clone(&record));

        debug!(
            operation = operations::SAVE,
            status = status::SUCCESS,
            task = task_identity,
            property_count = record.fingerprints.len(),
            "saved execution record"
        );
        Ok(record)
    }

    /// Forgets the record for `task_identity`. Returns whether one existed.
    pub fn invalidate(&self, task_identity: &str) -> Result<bool> {
        self.backend.remove(task_identity)?;
        let removed = self
            .records
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(task_identity)
            .is_some();

        debug!(
            operation = operations::INVALIDATE,
            task = task_identity,
            removed,
            "invalidated execution record"
        );
        Ok(removed)
    }

    /// Known task identities, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .records
            .read()
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();
        identities.sort();
        identities
    }

    /// Removes every record. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let identities = self.identities();
        for identity in &identities {
            self.invalidate(identity)?;
        }
        Ok(identities.len())
    }

    /// Flushes the backend at build end.
    pub fn close(self) -> Result<()> {
        self.backend.flush()
    }

    fn poisoned() -> OutputsError {
        OutputsError::HistoryIo {
            path: PathBuf::from("<history>"),
            source: std::io::Error::other("history lock poisoned"),
        }
    }
}
