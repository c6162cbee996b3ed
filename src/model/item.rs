use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Per-package metadata extracted by a site adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMeta {
    /// Marketplace this item was observed on
    pub market: String,

    /// Android package name, when the market exposes it
    #[serde(default)]
    pub pkg_name: Option<String>,

    /// Market-internal identifier, when the package name is unknown
    #[serde(default)]
    pub id: Option<String>,

    /// Market page the item was extracted from
    pub url: String,

    #[serde(default)]
    pub icon_url: Option<String>,

    #[serde(default)]
    pub developer_website: Option<String>,

    #[serde(default)]
    pub privacy_policy_url: Option<String>,

    /// HTTP status of the privacy-policy fetch, recorded by the pipeline
    #[serde(default)]
    pub privacy_policy_status: Option<u16>,

    /// Assigned at pipeline ingress
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Market-specific fields the core does not interpret
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-version crawl state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionData {
    #[serde(default)]
    pub download_url: Option<String>,

    /// Adapter-provided headers for the binary fetch (e.g. delivery auth)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Adapter-provided cookies for the binary fetch
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Android versionCode, when known
    #[serde(default)]
    pub code: Option<i64>,

    /// Set by the dedup stage when this version was already catalogued;
    /// guarantees the download stage does not hit the network
    #[serde(default)]
    pub skip: bool,

    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub file_sha256: Option<String>,

    #[serde(default)]
    pub file_size: Option<u64>,

    #[serde(default)]
    pub file_md5: Option<String>,

    /// After the download stage, either `file_sha256` is set or this is false
    #[serde(default)]
    pub file_success: Option<bool>,

    #[serde(default)]
    pub analysis: Option<AnalysisReport>,
}

/// Result of the external APK analyzer capability
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Package name from the manifest
    #[serde(default)]
    pub pkg_name: Option<String>,

    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default)]
    pub min_sdk: Option<u32>,

    #[serde(default)]
    pub target_sdk: Option<u32>,

    /// Lowercase hex SHA-256 fingerprints of the signing certificates
    #[serde(default)]
    pub cert_fingerprints: Vec<String>,

    /// autoVerify hosts declared in the manifest, wildcards included
    #[serde(default)]
    pub declared_domains: Vec<String>,

    /// Per-domain assetlinks.json result: `None` when the fetch or parse
    /// failed, otherwise `{pkg_name -> [fingerprints]}`
    #[serde(default)]
    pub assetlink_domains: BTreeMap<String, Option<BTreeMap<String, Vec<String>>>>,
}

/// The record for one (marketplace, package) pair traversing the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub meta: ItemMeta,

    /// Version string to per-version state
    #[serde(default)]
    pub versions: BTreeMap<String, VersionData>,
}

impl Item {
    pub fn new(market: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            meta: ItemMeta {
                market: market.into(),
                pkg_name: None,
                id: None,
                url: url.into(),
                icon_url: None,
                developer_website: None,
                privacy_policy_url: None,
                privacy_policy_status: None,
                timestamp: None,
                extra: serde_json::Map::new(),
            },
            versions: BTreeMap::new(),
        }
    }

    /// The package name if present, otherwise the market-internal id
    ///
    /// Used as the on-disk directory name and the catalogue natural key.
    pub fn identifier(&self) -> Option<&str> {
        self.meta
            .pkg_name
            .as_deref()
            .or(self.meta.id.as_deref())
    }

    /// An item must carry at least one of `pkg_name` / `id` before it leaves
    /// the adapter
    pub fn is_structurally_valid(&self) -> bool {
        self.identifier().is_some()
    }
}
