use crate::config::types::{Config, DatabaseType};
use crate::ConfigError;

/// Validates a parsed configuration
///
/// Checks cross-field constraints that TOML deserialization cannot express.
/// Any violation is fatal at startup.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.output.rootdir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "output.rootdir must not be empty".to_string(),
        ));
    }

    if config.crawler.concurrent_requests == 0 {
        return Err(ConfigError::Validation(
            "crawler.concurrent-requests must be at least 1".to_string(),
        ));
    }

    if config.crawler.user_agents.is_empty() {
        return Err(ConfigError::Validation(
            "crawler.user-agents must contain at least one entry".to_string(),
        ));
    }

    if config.crawler.redirect_limit == 0 {
        return Err(ConfigError::Validation(
            "crawler.redirect-limit must be at least 1".to_string(),
        ));
    }

    // The proxy pool must never be empty; a direct entry counts.
    if config.proxies.addresses.is_empty() && !config.proxies.allow_direct {
        return Err(ConfigError::Validation(
            "proxies: no addresses configured and allow-direct is false".to_string(),
        ));
    }

    if config.ratelimit.codes.is_empty() {
        return Err(ConfigError::Validation(
            "ratelimit.codes must contain at least one status code".to_string(),
        ));
    }

    match config.database.db_type {
        DatabaseType::Sqlite => {
            if config.database.path.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "database.path must not be empty for sqlite".to_string(),
                ));
            }
        }
        DatabaseType::Postgres => {
            if config.database.connection_string.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "database.connection-string must not be empty for postgres".to_string(),
                ));
            }
        }
    }

    if config.resumation.enabled && config.resumation.jobdir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "resumation.jobdir must not be empty when resumation is enabled".to_string(),
        ));
    }

    Ok(())
}
