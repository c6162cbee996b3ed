use crate::config::types::Config;
use crate::config::validation::validate_config;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use apkharvest::config::load_config;
///
/// let config = load_config(Path::new("config.toml")).unwrap();
/// println!("Root dir: {}", config.output.rootdir);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Used to detect whether the configuration changed between crawl runs, which
/// invalidates a resumed job directory.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const MINIMAL: &str = r#"
[output]
rootdir = "/tmp/harvest"

[database]
type = "sqlite"
path = "./test.db"
"#;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let file = create_temp_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.output.rootdir, "/tmp/harvest");
        assert_eq!(config.database.db_type, DatabaseType::Sqlite);
        assert_eq!(config.crawler.concurrent_requests, 5);
        assert_eq!(config.crawler.retry_times, 2);
        assert_eq!(config.ratelimit.base_inc_ms, 50);
        assert_eq!(config.ratelimit.codes, vec![429]);
        assert!(config.downloads.apk);
        assert!(config.proxies.allow_direct);
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
[output]
rootdir = "/data/harvest"

[input]
package-files = ["packages.txt"]
retrieve-from-db = true

[crawler]
concurrent-requests = 3
depth-limit = 8
item-count = 1000
download-timeout-secs = 60
retry-times = 4
user-agents = ["AgentA/1.0", "AgentB/2.0"]

[ratelimit]
default-backoff-secs = 30
base-inc-ms = 100
codes = [429, 503]

[resumation]
enabled = true
jobdir = "/data/jobdir"

[downloads]
apk = true
icon = false

[database]
type = "sqlite"
path = "/data/harvest.db"

[proxies]
addresses = ["socks5://127.0.0.1:1080"]
allow-direct = false

[markets.fdroid-like]
base-url = "https://market.example.com"
"#;
        let file = create_temp_config(content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.input.package_files, vec!["packages.txt"]);
        assert!(config.input.retrieve_from_db);
        assert_eq!(config.crawler.user_agents.len(), 2);
        assert_eq!(config.ratelimit.codes, vec![429, 503]);
        assert!(config.resumation.enabled);
        assert!(!config.downloads.icon);
        assert_eq!(config.proxies.addresses.len(), 1);
        assert!(config.markets.contains_key("fdroid-like"));
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_required_key_is_fatal() {
        // No [output] table at all
        let file = create_temp_config("[database]\ntype = \"sqlite\"\n");
        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_compute_config_hash_is_stable() {
        let file = create_temp_config(MINIMAL);
        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");
        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }
}
