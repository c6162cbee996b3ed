//! Configuration loading and validation
//!
//! Configuration is a TOML file with one table per concern (output, input,
//! crawler, ratelimit, resumation, downloads, database, proxies) plus one
//! opaque table per marketplace. Loading fails fast on missing required keys.

mod parser;
mod types;
mod validation;

pub use parser::{load_config, load_config_with_hash};
pub use types::{
    Config, CrawlerConfig, DatabaseConfig, DatabaseType, DownloadsConfig, InputConfig,
    OutputConfig, ProxyConfig, RateLimitConfig, ResumationConfig,
};
pub use validation::validate_config;
