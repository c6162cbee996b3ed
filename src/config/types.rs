use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for apkharvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub output: OutputConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub ratelimit: RateLimitConfig,

    #[serde(default)]
    pub resumation: ResumationConfig,

    #[serde(default)]
    pub downloads: DownloadsConfig,

    pub database: DatabaseConfig,

    #[serde(default)]
    pub proxies: ProxyConfig,

    /// Marketplace-specific tables (credentials, endpoints). Opaque to the
    /// core; each adapter reads its own entry.
    #[serde(default)]
    pub markets: BTreeMap<String, toml::Value>,
}

/// Output locations for on-disk artifacts
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Base directory for binaries, icons, documents and meta files
    pub rootdir: String,
}

/// Seed input configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputConfig {
    /// Text files with one package identifier per line
    #[serde(rename = "package-files", default)]
    pub package_files: Vec<String>,

    /// Also seed from packages previously observed in the catalogue
    #[serde(rename = "retrieve-from-db", default)]
    pub retrieve_from_db: bool,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Parallel request executors per marketplace
    #[serde(rename = "concurrent-requests", default = "default_concurrent_requests")]
    pub concurrent_requests: u32,

    /// Maximum callback depth from a seed request (0 = unlimited)
    #[serde(rename = "depth-limit", default)]
    pub depth_limit: u32,

    /// Stop after this many items have been processed (0 = unlimited)
    #[serde(rename = "item-count", default)]
    pub item_count: u64,

    /// Absolute deadline for a single fetch, in seconds
    #[serde(rename = "download-timeout-secs", default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// Retries for retriable failures before a request is dropped
    #[serde(rename = "retry-times", default = "default_retry_times")]
    pub retry_times: u32,

    /// User-agent strings rotated per request
    #[serde(rename = "user-agents", default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Response bodies above this size are spilled to a temp file
    #[serde(rename = "body-spill-bytes", default = "default_body_spill")]
    pub body_spill_bytes: u64,

    /// Maximum redirect hops followed per request
    #[serde(rename = "redirect-limit", default = "default_redirect_limit")]
    pub redirect_limit: u32,
}

/// Rate limiting tunables
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Backoff applied on a 429 without a Retry-After header, in seconds
    #[serde(rename = "default-backoff-secs", default = "default_backoff_secs")]
    pub default_backoff_secs: u64,

    /// Chronic per-host pause growth per rate-limit event, in milliseconds
    #[serde(rename = "base-inc-ms", default = "default_base_inc_ms")]
    pub base_inc_ms: u64,

    /// Per-host pause decay per successful response, in milliseconds
    #[serde(rename = "decay-ms", default = "default_decay_ms")]
    pub decay_ms: u64,

    /// Minimum spacing between consecutive base-pause increments, in seconds
    #[serde(rename = "interval-secs", default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Status codes treated as rate-limiting
    #[serde(default = "default_ratelimit_codes")]
    pub codes: Vec<u16>,
}

/// Crawl resumption configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ResumationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Directory for scheduler snapshots
    #[serde(default = "default_jobdir")]
    pub jobdir: String,

    /// Snapshot the scheduler every N processed items
    #[serde(rename = "snapshot-every", default = "default_snapshot_every")]
    pub snapshot_every: u64,
}

/// Toggles for the binary/icon download pipeline stages
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_true")]
    pub apk: bool,

    #[serde(default = "default_true")]
    pub icon: bool,
}

/// Dedup catalogue backend selection
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,

    /// SQLite file path, ignored for postgres
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Postgres connection string, ignored for sqlite
    #[serde(rename = "connection-string", default)]
    pub connection_string: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Postgres,
}

/// Proxy pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Proxy addresses, e.g. "socks5://10.0.0.1:1080"
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Include a direct (no-proxy) entry in the pool
    #[serde(rename = "allow-direct", default = "default_true")]
    pub allow_direct: bool,
}

fn default_concurrent_requests() -> u32 {
    5
}

fn default_download_timeout() -> u64 {
    120
}

fn default_retry_times() -> u32 {
    2
}

fn default_user_agents() -> Vec<String> {
    vec![format!("apkharvest/{}", env!("CARGO_PKG_VERSION"))]
}

fn default_body_spill() -> u64 {
    4 * 1024 * 1024
}

fn default_redirect_limit() -> u32 {
    10
}

fn default_backoff_secs() -> u64 {
    60
}

fn default_base_inc_ms() -> u64 {
    50
}

fn default_decay_ms() -> u64 {
    10
}

fn default_interval_secs() -> u64 {
    1
}

fn default_ratelimit_codes() -> Vec<u16> {
    vec![429]
}

fn default_jobdir() -> String {
    "./jobdir".to_string()
}

fn default_snapshot_every() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> String {
    "./apkharvest.db".to_string()
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: default_concurrent_requests(),
            depth_limit: 0,
            item_count: 0,
            download_timeout_secs: default_download_timeout(),
            retry_times: default_retry_times(),
            user_agents: default_user_agents(),
            body_spill_bytes: default_body_spill(),
            redirect_limit: default_redirect_limit(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_backoff_secs: default_backoff_secs(),
            base_inc_ms: default_base_inc_ms(),
            decay_ms: default_decay_ms(),
            interval_secs: default_interval_secs(),
            codes: default_ratelimit_codes(),
        }
    }
}

impl Default for ResumationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jobdir: default_jobdir(),
            snapshot_every: default_snapshot_every(),
        }
    }
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            apk: true,
            icon: true,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            allow_direct: true,
        }
    }
}
