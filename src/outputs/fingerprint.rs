/// Content fingerprinting of declared output locations
///
/// A fingerprint maps every declared location (normalized path) to a snapshot
/// of what is on disk: a file hash, a folded directory hash, or an explicit
/// absent marker. Directory contents are sorted lexically before folding, so
/// the filesystem's enumeration order never leaks into the result.
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{OutputsError, Result};
use crate::logging::operations;

/// SHA-256 digest of a file or a folded directory listing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}..)", &self.to_hex()[..8])
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("content hash must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

/// How file contents are summarized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMethod {
    /// Hash file contents (SHA256)
    #[default]
    Content,
    /// Hash file contents and modification time. A touched file counts as
    /// changed even when its bytes are the same.
    Mtime,
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashMethod::Content => f.write_str("content"),
            HashMethod::Mtime => f.write_str("mtime"),
        }
    }
}

impl std::str::FromStr for HashMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "content" => Ok(HashMethod::Content),
            "mtime" => Ok(HashMethod::Mtime),
            other => Err(format!(
                "unknown hash method '{other}', expected content or mtime"
            )),
        }
    }
}

/// State of one declared location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Snapshot {
    File {
        hash: ContentHash,
    },
    Directory {
        hash: ContentHash,
        /// Regular files below the directory, keyed by normalized relative path.
        files: BTreeMap<String, ContentHash>,
    },
    Absent,
}

/// Fingerprint of a set of output locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub method: HashMethod,
    pub entries: BTreeMap<String, Snapshot>,
}

impl Fingerprint {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Describes how this fingerprint differs from `previous`.
    ///
    /// Returns an empty list when both are equal.
    pub fn changes(&self, previous: &Fingerprint) -> Vec<String> {
        let mut changes = Vec::new();

        if self.method != previous.method {
            changes.push(format!(
                "hash method changed from {} to {}",
                previous.method, self.method
            ));
        }

        for (path, current) in &self.entries {
            match previous.entries.get(path) {
                None => changes.push(format!("{path} is newly declared")),
                Some(before) => describe_snapshot_change(path, before, current, &mut changes),
            }
        }

        for path in previous.entries.keys() {
            if !self.entries.contains_key(path) {
                changes.push(format!("{path} is no longer declared"));
            }
        }

        changes
    }

    /// Every existing file covered by this fingerprint, resolved against `base_dir`.
    pub fn files(&self, base_dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for (path, snapshot) in &self.entries {
            let root = base_dir.join(path);
            match snapshot {
                Snapshot::File { .. } => files.push(root),
                Snapshot::Directory { files: children, .. } => {
                    files.extend(children.keys().map(|rel| root.join(rel)));
                }
                Snapshot::Absent => {}
            }
        }
        files
    }
}

fn describe_snapshot_change(path: &str, before: &Snapshot, after: &Snapshot, out: &mut Vec<String>) {
    match (before, after) {
        (a, b) if a == b => {}
        (Snapshot::Absent, _) => out.push(format!("{path} was created")),
        (_, Snapshot::Absent) => out.push(format!("{path} was removed")),
        (Snapshot::File { .. }, Snapshot::File { .. }) => out.push(format!("{path} was modified")),
        (
            Snapshot::Directory { files: old, .. },
            Snapshot::Directory { files: new, .. },
        ) => {
            for (rel, hash) in new {
                match old.get(rel) {
                    None => out.push(format!("{path}/{rel} was created")),
                    Some(previous) if previous != hash => {
                        out.push(format!("{path}/{rel} was modified"))
                    }
                    Some(_) => {}
                }
            }
            for rel in old.keys() {
                if !new.contains_key(rel) {
                    out.push(format!("{path}/{rel} was removed"));
                }
            }
        }
        _ => out.push(format!("{path} changed type")),
    }
}

/// Normalizes a path so fingerprints do not depend on how a location was spelled.
///
/// Paths below `base_dir` become relative to it. `.` and `..` are resolved
/// lexically, separators become `/` and trailing separators disappear.
pub fn normalize_path(path: &Path, base_dir: &Path, fold_case: bool) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    let resolved = lexical_resolve(&absolute);
    let base = lexical_resolve(base_dir);

    let (relative, rooted) = match resolved.strip_prefix(&base) {
        Ok(rel) => (rel.to_path_buf(), false),
        Err(_) => (resolved.clone(), true),
    };

    let mut parts = Vec::new();
    let mut prefix = String::new();
    for component in relative.components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().into_owned(),
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::RootDir | Component::CurDir | Component::ParentDir => {}
        }
    }

    let mut normalized = parts.join("/");
    if rooted {
        normalized = format!("{prefix}/{normalized}");
    } else if normalized.is_empty() {
        normalized = ".".to_string();
    }

    if fold_case {
        normalized.to_lowercase()
    } else {
        normalized
    }
}

fn lexical_resolve(path: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    resolved
}

/// Computes fingerprints for output locations of one task
#[derive(Clone)]
pub struct Fingerprinter {
    base_dir: PathBuf,
    method: HashMethod,
    fold_case: bool,
    pool: Option<Arc<rayon::ThreadPool>>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("base_dir", &self.base_dir)
            .field("method", &self.method)
            .field("fold_case", &self.fold_case)
            .finish()
    }
}

/// Case folding defaults to on where the host file system ignores case.
pub fn default_fold_case() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

impl Fingerprinter {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            method: HashMethod::default(),
            fold_case: default_fold_case(),
            pool: None,
            cancelled: None,
        }
    }

    pub fn with_method(mut self, method: HashMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_fold_case(mut self, fold_case: bool) -> Self {
        self.fold_case = fold_case;
        self
    }

    /// Limits hashing to `threads` workers (0 = one per CPU).
    pub fn with_threads(mut self, threads: usize) -> Result<Self> {
        let threads = if threads == 0 { num_cpus::get() } else { threads };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("taskout-hash-{i}"))
            .build()
            .map_err(|e| OutputsError::FingerprintIo {
                path: PathBuf::new(),
                source: io::Error::other(e.to_string()),
            })?;
        self.pool = Some(Arc::new(pool));
        Ok(self)
    }

    /// Shares a flag that stops fingerprinting when set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn method(&self) -> HashMethod {
        self.method
    }

    /// Resolves a declared location against the base directory.
    pub fn resolve(&self, location: &Path) -> PathBuf {
        if location.is_absolute() {
            location.to_path_buf()
        } else {
            self.base_dir.join(location)
        }
    }

    pub fn normalize(&self, location: &Path) -> String {
        normalize_path(location, &self.base_dir, self.fold_case)
    }

    /// Fingerprints a set of locations.
    pub fn fingerprint<'a, I>(&self, locations: I) -> Result<Fingerprint>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let mut unique: BTreeMap<String, PathBuf> = BTreeMap::new();
        for location in locations {
            unique
                .entry(self.normalize(location))
                .or_insert_with(|| self.resolve(location));
        }

        let compute = || -> Result<BTreeMap<String, Snapshot>> {
            unique
                .into_par_iter()
                .map(|(key, path)| Ok((key, self.snapshot(&path)?)))
                .collect()
        };

        let entries = match &self.pool {
            Some(pool) => pool.install(compute)?,
            None => compute()?,
        };

        debug!(
            operation = operations::FINGERPRINT,
            entry_count = entries.len(),
            method = %self.method,
            "fingerprinted output locations"
        );

        Ok(Fingerprint {
            method: self.method,
            entries,
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancelled {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(OutputsError::Cancelled),
            _ => Ok(()),
        }
    }

    fn snapshot(&self, path: &Path) -> Result<Snapshot> {
        self.check_cancelled()?;

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Snapshot::Absent),
            Err(e) => {
                return Err(OutputsError::FingerprintIo {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        if metadata.is_dir() {
            self.snapshot_directory(path)
        } else {
            Ok(Snapshot::File {
                hash: self.hash_file(path)?,
            })
        }
    }

    fn snapshot_directory(&self, root: &Path) -> Result<Snapshot> {
        let mut listed = Vec::new();
        for entry in walkdir::WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                // Deleted while walking: absent files simply are not listed
                Err(e) if e.io_error().map(|io| io.kind()) == Some(io::ErrorKind::NotFound) => {
                    continue
                }
                Err(e) => {
                    let path = e.path().unwrap_or(root).to_path_buf();
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("file system loop"));
                    return Err(OutputsError::FingerprintIo { path, source });
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            listed.push((
                normalize_path(rel, Path::new(""), self.fold_case),
                normalize_path(rel, Path::new(""), false),
                entry.into_path(),
            ));
        }

        let mut hashed: Vec<(String, String, ContentHash)> = listed
            .into_par_iter()
            .map(|(key, exact, path)| Ok((key, exact, self.hash_file(&path)?)))
            .collect::<Result<_>>()?;
        hashed.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        let mut files: BTreeMap<String, ContentHash> = BTreeMap::new();
        for (key, _, hash) in hashed {
            // Names differing only in case share a folded key; combine them in path order
            let hash = match files.remove(&key) {
                Some(previous) => {
                    let mut hasher = Sha256::new();
                    hasher.update(previous.as_bytes());
                    hasher.update(hash.as_bytes());
                    ContentHash::from_hasher(hasher)
                }
                None => hash,
            };
            files.insert(key, hash);
        }

        let mut hasher = Sha256::new();
        for (rel, hash) in &files {
            hasher.update(rel.as_bytes());
            hasher.update([0u8]);
            hasher.update(hash.as_bytes());
        }

        Ok(Snapshot::Directory {
            hash: ContentHash::from_hasher(hasher),
            files,
        })
    }

    fn hash_file(&self, path: &Path) -> Result<ContentHash> {
        self.check_cancelled()?;

        let io_err = |source| OutputsError::FingerprintIo {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(io_err)?;
        let mut hasher = Sha256::new();
        if self.method == HashMethod::Mtime {
            let modified = file
                .metadata()
                .and_then(|m| m.modified())
                .map_err(io_err)?;
            let nanos = modified
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            hasher.update(nanos.to_le_bytes());
        }
        io::copy(&mut file, &mut hasher).map_err(io_err)?;
        Ok(ContentHash::from_hasher(hasher))
    }
}
