/// Packing of declared outputs for the build cache
///
/// A packed blob is a zstd-compressed tar holding `manifest.json` followed by
/// every existing output location under `outputs/`, relative to the task's
/// base directory.
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path};
use tar::{Archive, Builder, Header};
use zstd::{decode_all, encode_all};

use crate::error::{OutputsError, Result};
use crate::outputs::fingerprint::normalize_path;
use crate::outputs::CachePayload;

const MANIFEST_ENTRY: &str = "manifest.json";
const OUTPUTS_PREFIX: &str = "outputs";
const COMPRESSION_LEVEL: i32 = 3;

/// Describes what a packed blob contains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// Digest of the packed output fingerprints, see [`CachePayload::key_material`].
    pub key_material: String,
    pub payload: CachePayload,
}

/// Packs the locations named by `payload` into a tar+zstd blob.
///
/// Locations that do not exist are skipped; the fingerprints in the manifest
/// still record them as absent.
pub fn pack_outputs(payload: &CachePayload, base_dir: &Path) -> Result<Vec<u8>> {
    let manifest = ArchiveManifest {
        key_material: payload.key_material(),
        payload: payload.clone(),
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

    let mut tar_data = Vec::new();
    {
        let mut tar = Builder::new(&mut tar_data);

        let mut header = Header::new_gnu();
        header.set_size(manifest_bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, MANIFEST_ENTRY, manifest_bytes.as_slice())
            .map_err(|e| archive_err("failed to add manifest", e))?;

        for property in &payload.properties {
            for location in &property.locations {
                let relative = relative_location(location, base_dir)?;
                let source = base_dir.join(&relative);
                let name = Path::new(OUTPUTS_PREFIX).join(&relative);

                if source.is_dir() {
                    tar.append_dir_all(&name, &source).map_err(|e| {
                        archive_err(&format!("failed to archive directory {relative}"), e)
                    })?;
                } else if source.is_file() {
                    tar.append_path_with_name(&source, &name).map_err(|e| {
                        archive_err(&format!("failed to archive file {relative}"), e)
                    })?;
                }
            }
        }

        tar.finish()
            .map_err(|e| archive_err("failed to finalize tar archive", e))?;
    }

    encode_all(tar_data.as_slice(), COMPRESSION_LEVEL)
        .map_err(|e| archive_err("failed to compress archive", e))
}

/// Restores a blob produced by [`pack_outputs`] below `base_dir`.
///
/// Every location listed in the manifest is cleared first so stale files
/// from a previous run do not survive the restore.
pub fn unpack_outputs(bytes: &[u8], base_dir: &Path) -> Result<ArchiveManifest> {
    let tar_data =
        decode_all(bytes).map_err(|e| archive_err("failed to decompress archive", e))?;

    let manifest = read_manifest(&tar_data)?;

    for property in &manifest.payload.properties {
        for location in &property.locations {
            let target = base_dir.join(relative_location(location, base_dir)?);
            remove_existing(&target)?;
        }
    }

    let mut archive = Archive::new(tar_data.as_slice());
    let entries = archive
        .entries()
        .map_err(|e| archive_err("failed to read archive", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_err("failed to read archive entry", e))?;
        let path = entry
            .path()
            .map_err(|e| archive_err("invalid entry path", e))?
            .into_owned();

        let Ok(relative) = path.strip_prefix(OUTPUTS_PREFIX) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(OutputsError::Archive(format!(
                "entry {} escapes the output directory",
                path.display()
            )));
        }

        let target = base_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| OutputsError::CacheIo {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        entry
            .unpack(&target)
            .map_err(|e| archive_err(&format!("failed to extract {}", relative.display()), e))?;
    }

    Ok(manifest)
}

fn read_manifest(tar_data: &[u8]) -> Result<ArchiveManifest> {
    let mut archive = Archive::new(tar_data);
    let entries = archive
        .entries()
        .map_err(|e| archive_err("failed to read archive", e))?;
    for entry in entries {
        let entry = entry.map_err(|e| archive_err("failed to read archive entry", e))?;
        let is_manifest = entry
            .path()
            .map(|p| p == Path::new(MANIFEST_ENTRY))
            .unwrap_or(false);
        if is_manifest {
            return Ok(serde_json::from_reader(entry)?);
        }
    }
    Err(OutputsError::Archive("archive has no manifest".to_string()))
}

/// Location relative to `base_dir`, rejecting anything outside it.
fn relative_location(location: &Path, base_dir: &Path) -> Result<String> {
    let relative = normalize_path(location, base_dir, false);
    if relative == "." || relative.starts_with('/') || Path::new(&relative).is_absolute() {
        return Err(OutputsError::Archive(format!(
            "output {} is not inside {}",
            location.display(),
            base_dir.display()
        )));
    }
    Ok(relative)
}

fn remove_existing(target: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(target),
        Ok(_) => fs::remove_file(target),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|source| OutputsError::CacheIo {
        path: target.to_path_buf(),
        source,
    })
}

fn archive_err(context: &str, err: io::Error) -> OutputsError {
    OutputsError::Archive(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::{HistoryStore, TaskOutputs};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn payload_for(base: &Path, locations: &[&str]) -> CachePayload {
        let mut builder = TaskOutputs::builder(":assemble", base);
        builder
            .declare("dist", locations.iter().copied(), true)
            .unwrap()
            .cacheable(true);
        let outputs = builder.build(Arc::new(HistoryStore::in_memory()));
        outputs.cache_payload().unwrap().unwrap()
    }

    #[test]
    fn test_pack_and_unpack_directory() {
        let temp = TempDir::new().unwrap();
        let base = temp.path();
        fs::create_dir_all(base.join("dist/nested")).unwrap();
        fs::write(base.join("dist/file1.txt"), "content1").unwrap();
        fs::write(base.join("dist/nested/file2.txt"), "content2").unwrap();

        let payload = payload_for(base, &["dist"]);
        let blob = pack_outputs(&payload, base).unwrap();

        fs::remove_dir_all(base.join("dist")).unwrap();
        let manifest = unpack_outputs(&blob, base).unwrap();

        assert_eq!(manifest.payload, payload);
        assert_eq!(manifest.key_material, payload.key_material());
        assert_eq!(fs::read_to_string(base.join("dist/file1.txt")).unwrap(), "content1");
        assert_eq!(
            fs::read_to_string(base.join("dist/nested/file2.txt")).unwrap(),
            "content2"
        );
    }

    #[test]
    fn test_unpack_replaces_stale_files() {
        let temp = TempDir::new().unwrap();
        let base = temp.path();
        fs::create_dir_all(base.join("dist")).unwrap();
        fs::write(base.join("dist/app.js"), "cached").unwrap();

        let blob = pack_outputs(&payload_for(base, &["dist"]), base).unwrap();

        fs::write(base.join("dist/app.js"), "local edit").unwrap();
        fs::write(base.join("dist/stale.js"), "leftover").unwrap();
        unpack_outputs(&blob, base).unwrap();

        assert_eq!(fs::read_to_string(base.join("dist/app.js")).unwrap(), "cached");
        assert!(!base.join("dist/stale.js").exists());
    }

    #[test]
    fn test_missing_location_is_skipped() {
        let temp = TempDir::new().unwrap();
        let base = temp.path();
        fs::write(base.join("report.txt"), "ok").unwrap();

        let payload = payload_for(base, &["report.txt", "missing.txt"]);
        let blob = pack_outputs(&payload, base).unwrap();

        fs::remove_file(base.join("report.txt")).unwrap();
        unpack_outputs(&blob, base).unwrap();

        assert_eq!(fs::read_to_string(base.join("report.txt")).unwrap(), "ok");
        assert!(!base.join("missing.txt").exists());
    }

    #[test]
    fn test_location_outside_base_rejected() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("project");
        fs::create_dir_all(&base).unwrap();
        fs::write(temp.path().join("elsewhere.txt"), "x").unwrap();

        let payload = payload_for(&base, &["../elsewhere.txt"]);
        assert!(matches!(
            pack_outputs(&payload, &base),
            Err(OutputsError::Archive(_))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            unpack_outputs(b"not an archive", temp.path()),
            Err(OutputsError::Archive(_))
        ));
    }
}
