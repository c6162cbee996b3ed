//! The dedup catalogue seam
//!
//! Both backends implement this synchronous trait; pipeline stages hold it
//! behind `Arc<Mutex<dyn Catalogue>>` and make short calls only.

use crate::store::StoreResult;

/// A freshly downloaded binary plus the version row it belongs to, recorded
/// in one transaction
#[derive(Debug, Clone)]
pub struct DownloadRecord<'a> {
    pub identifier: &'a str,
    pub version: &'a str,
    pub market: &'a str,
    pub sha256: &'a str,
    pub path: &'a str,
    pub size: u64,
    pub md5: Option<&'a str>,
}

/// Version/binary bookkeeping shared by every marketplace
pub trait Catalogue: Send {
    /// Canonical on-disk path for a binary digest, if one is stored
    fn path_by_sha(&self, sha256: &str) -> StoreResult<Option<String>>;

    /// Whether a version row exists; returns its digest when recorded
    fn version_exists(
        &self,
        identifier: &str,
        version: &str,
        market: &str,
    ) -> StoreResult<Option<Option<String>>>;

    /// Appends a package sighting; duplicates are expected and kept
    fn insert_package(&self, identifier: &str, market: &str, url: &str) -> StoreResult<()>;

    /// Records a version row; inserting an existing row is a no-op
    fn insert_version(
        &self,
        identifier: &str,
        version: &str,
        market: &str,
        sha256: Option<&str>,
    ) -> StoreResult<()>;

    /// Records a binary row; inserting an existing digest is a no-op
    fn insert_apk(&self, sha256: &str, path: &str, size: u64, md5: Option<&str>)
        -> StoreResult<()>;

    /// Records an apk row and its version row atomically
    fn record_download(&self, record: &DownloadRecord<'_>) -> StoreResult<()>;

    /// Distinct package identifiers previously observed on a market
    fn observed_packages(&self, market: &str) -> StoreResult<Vec<String>>;
}
