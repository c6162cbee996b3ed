//! Content-addressed artifact store
//!
//! Binaries live under `<root>/apks/<sha256>.apk` once, however many package
//! versions reference them. Per-package artifacts (icons, documents, meta
//! files) live under `<root>/<market>/<identifier>/`. Every write goes
//! through a temp file in `<root>/tmp` and an atomic rename, so readers
//! never observe a partial artifact.

use crate::model::Body;
use crate::store::{StoreError, StoreResult};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// A body hashed and staged in the temp area, not yet committed
#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub sha256: String,
    pub md5: String,
    pub size: u64,
}

/// On-disk artifact store rooted at the configured output directory
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("apks"))?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path for a binary with the given digest
    pub fn apk_path(&self, sha256: &str) -> PathBuf {
        self.root.join("apks").join(format!("{}.apk", sha256))
    }

    /// Hashes a response body into a staged temp file
    ///
    /// Streams in 4 KiB chunks; the body is never fully buffered regardless
    /// of whether the fetcher spilled it.
    pub fn ingest_body(&self, body: &Body) -> StoreResult<IngestedFile> {
        let staged = self.next_temp_path();
        let mut out = fs::File::create(&staged)?;
        let mut sha = Sha256::new();
        let mut md5 = Md5::new();
        let mut size: u64 = 0;

        match body {
            Body::Bytes(bytes) => {
                for chunk in bytes.chunks(4096) {
                    sha.update(chunk);
                    md5.update(chunk);
                    out.write_all(chunk)?;
                    size += chunk.len() as u64;
                }
            }
            Body::File(path) => {
                let mut input = fs::File::open(path)?;
                let mut buffer = [0u8; 4096];
                loop {
                    let n = input.read(&mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    sha.update(&buffer[..n]);
                    md5.update(&buffer[..n]);
                    out.write_all(&buffer[..n])?;
                    size += n as u64;
                }
            }
        }
        out.flush()?;

        Ok(IngestedFile {
            path: staged,
            sha256: hex::encode(sha.finalize()),
            md5: hex::encode(md5.finalize()),
            size,
        })
    }

    /// Commits a staged binary to its canonical content-addressed path
    ///
    /// If the digest already exists the staged copy is discarded and the
    /// existing path returned; the rename is the publication point.
    pub fn commit_apk(&self, ingested: &IngestedFile) -> StoreResult<PathBuf> {
        let canonical = self.apk_path(&ingested.sha256);
        if canonical.exists() {
            fs::remove_file(&ingested.path)?;
            tracing::debug!(sha256 = %ingested.sha256, "binary already stored");
            return Ok(canonical);
        }
        fs::rename(&ingested.path, &canonical)?;
        Ok(canonical)
    }

    /// Writes a per-package artifact (icon, document, meta file) atomically
    pub fn write_artifact(
        &self,
        market: &str,
        identifier: &str,
        filename: &str,
        bytes: &[u8],
    ) -> StoreResult<PathBuf> {
        if identifier.is_empty() {
            return Err(StoreError::Message(
                "artifact write without an identifier".to_string(),
            ));
        }
        let dir = self.root.join(market).join(identifier);
        fs::create_dir_all(&dir)?;

        let staged = self.next_temp_path();
        fs::write(&staged, bytes)?;
        let target = dir.join(filename);
        fs::rename(&staged, &target)?;
        Ok(target)
    }

    /// Removes a previously committed or staged file
    pub fn remove(&self, path: &Path) -> StoreResult<()> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn next_temp_path(&self) -> PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join("tmp")
            .join(format!("stage-{}-{}", std::process::id(), n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_ingest_hashes_and_sizes() {
        let (_dir, store) = store();
        let ingested = store.ingest_body(&Body::Bytes(b"TEST".to_vec())).unwrap();

        assert_eq!(ingested.size, 4);
        assert_eq!(
            ingested.sha256,
            "94ee059335e587e501cc4bf90613e0814f00a7b08bc7c648fd865a2af6a22cc2"
        );
        assert_eq!(ingested.md5, "033bd94b1168d7e4f0d644c3c95e35bf");
        assert!(ingested.path.exists());
    }

    #[test]
    fn test_ingest_from_spilled_file() {
        let (_dir, store) = store();
        let spill = tempfile::NamedTempFile::new().unwrap();
        fs::write(spill.path(), b"TEST").unwrap();

        let ingested = store
            .ingest_body(&Body::File(spill.path().to_path_buf()))
            .unwrap();
        assert_eq!(
            ingested.sha256,
            "94ee059335e587e501cc4bf90613e0814f00a7b08bc7c648fd865a2af6a22cc2"
        );
        assert_eq!(ingested.size, 4);
    }

    #[test]
    fn test_commit_moves_to_canonical_path() {
        let (_dir, store) = store();
        let ingested = store.ingest_body(&Body::Bytes(b"TEST".to_vec())).unwrap();
        let staged = ingested.path.clone();

        let canonical = store.commit_apk(&ingested).unwrap();
        assert_eq!(canonical, store.apk_path(&ingested.sha256));
        assert!(canonical.exists());
        assert!(!staged.exists());
        assert_eq!(fs::read(&canonical).unwrap(), b"TEST");
    }

    #[test]
    fn test_commit_of_known_digest_discards_duplicate() {
        let (_dir, store) = store();
        let first = store.ingest_body(&Body::Bytes(b"TEST".to_vec())).unwrap();
        let canonical = store.commit_apk(&first).unwrap();

        let second = store.ingest_body(&Body::Bytes(b"TEST".to_vec())).unwrap();
        let staged = second.path.clone();
        let path = store.commit_apk(&second).unwrap();

        assert_eq!(path, canonical);
        assert!(!staged.exists());
    }

    #[test]
    fn test_write_artifact_lands_under_market_and_identifier() {
        let (_dir, store) = store();
        let path = store
            .write_artifact("testmarket", "com.example.app", "icon.1000.ico", b"ICON")
            .unwrap();

        assert!(path.ends_with("testmarket/com.example.app/icon.1000.ico"));
        assert_eq!(fs::read(&path).unwrap(), b"ICON");
    }

    #[test]
    fn test_write_artifact_rejects_empty_identifier() {
        let (_dir, store) = store();
        assert!(store
            .write_artifact("testmarket", "", "meta.json", b"{}")
            .is_err());
    }
}
