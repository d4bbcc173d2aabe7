//! Checksummed snapshot storage for index state
//!
//! Snapshots are zstd-compressed, prefixed with the BLAKE3 digest of the
//! compressed payload, and written atomically (temp file, fsync, rename).

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

const DIGEST_LEN: usize = 32;
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Snapshot {name} is corrupted: {reason}")]
    Corrupted { name: String, reason: String },
}

/// Named snapshot files under a single directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    base_path: PathBuf,
}

impl SnapshotStore {
    /// Create a snapshot store rooted at `base_path`, creating the directory
    pub fn new(base_path: PathBuf) -> Result<Self, SnapshotError> {
        fs::create_dir_all(&base_path).map_err(|e| SnapshotError::Io {
            source: e,
            context: format!(
                "Failed to create snapshot directory: {}",
                base_path.display()
            ),
        })?;
        Ok(Self { base_path })
    }

    /// Atomically replace the snapshot `name` with `data`
    pub fn write(&self, name: &str, data: &[u8]) -> Result<(), SnapshotError> {
        let compressed =
            zstd::encode_all(data, COMPRESSION_LEVEL).map_err(|e| SnapshotError::Io {
                source: e,
                context: format!("Failed to compress snapshot {}", name),
            })?;
        let digest = blake3::hash(&compressed);

        let final_path = self.snapshot_path(name);
        let temp_path = self.temp_path(name);

        let mut file = fs::File::create(&temp_path).map_err(|e| SnapshotError::Io {
            source: e,
            context: format!("Failed to create temp snapshot: {}", temp_path.display()),
        })?;
        file.write_all(digest.as_bytes())
            .and_then(|_| file.write_all(&compressed))
            .map_err(|e| SnapshotError::Io {
                source: e,
                context: format!("Failed to write snapshot: {}", temp_path.display()),
            })?;
        file.sync_all().map_err(|e| SnapshotError::Io {
            source: e,
            context: format!("Failed to sync snapshot: {}", temp_path.display()),
        })?;
        drop(file);

        fs::rename(&temp_path, &final_path).map_err(|e| SnapshotError::Io {
            source: e,
            context: format!(
                "Failed to move snapshot into place: {} -> {}",
                temp_path.display(),
                final_path.display()
            ),
        })?;

        tracing::debug!(
            "Wrote snapshot {} ({} bytes raw, {} bytes stored)",
            name,
            data.len(),
            compressed.len() + DIGEST_LEN
        );
        Ok(())
    }

    /// Read the snapshot `name`, or `None` if it has never been written
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>, SnapshotError> {
        let path = self.snapshot_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read(&path).map_err(|e| SnapshotError::Io {
            source: e,
            context: format!("Failed to read snapshot: {}", path.display()),
        })?;

        if raw.len() < DIGEST_LEN {
            return Err(SnapshotError::Corrupted {
                name: name.to_string(),
                reason: format!("truncated file ({} bytes)", raw.len()),
            });
        }

        let (stored_digest, payload) = raw.split_at(DIGEST_LEN);
        if blake3::hash(payload).as_bytes().as_slice() != stored_digest {
            return Err(SnapshotError::Corrupted {
                name: name.to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }

        let data = zstd::decode_all(payload).map_err(|e| SnapshotError::Corrupted {
            name: name.to_string(),
            reason: format!("decompression failed: {}", e),
        })?;

        Ok(Some(data))
    }

    /// Size on disk of the snapshot `name`, 0 when absent
    pub fn size(&self, name: &str) -> u64 {
        fs::metadata(self.snapshot_path(name))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn snapshot_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}.snap", name))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!(".{}.snap.tmp", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path().to_path_buf()).unwrap();

        let data = b"dense index state".repeat(100);
        store.write("dense", &data).unwrap();

        let read = store.read("dense").unwrap().unwrap();
        assert_eq!(read, data);
        assert!(store.size("dense") > 0);
    }

    #[test]
    fn test_missing_snapshot() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path().to_path_buf()).unwrap();

        assert!(store.read("absent").unwrap().is_none());
        assert_eq!(store.size("absent"), 0);
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path().to_path_buf()).unwrap();

        store.write("dense", b"first").unwrap();
        store.write("dense", b"second").unwrap();

        assert_eq!(store.read("dense").unwrap().unwrap(), b"second");
        assert!(!temp.path().join(".dense.snap.tmp").exists());
    }

    #[test]
    fn test_detects_corruption() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path().to_path_buf()).unwrap();

        store.write("dense", b"payload that will be damaged").unwrap();

        let path = temp.path().join("dense.snap");
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        fs::write(&path, raw).unwrap();

        let err = store.read("dense").unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupted { .. }));
    }

    #[test]
    fn test_detects_truncation() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path().to_path_buf()).unwrap();

        fs::write(temp.path().join("dense.snap"), b"short").unwrap();
        assert!(matches!(
            store.read("dense"),
            Err(SnapshotError::Corrupted { .. })
        ));
    }
}
