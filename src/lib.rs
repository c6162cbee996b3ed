//! Apkharvest: a polite, resumable, multi-source Android application crawler
//!
//! This crate implements the fetch/process core of an APK marketplace crawler:
//! a rate-controlled request scheduler with proxy rotation, site adapters that
//! turn marketplace responses into crawl items, and an item pipeline that
//! downloads binaries into a content-addressed store deduplicated by SHA-256.

pub mod adapter;
pub mod config;
pub mod crawler;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod telemetry;
pub mod web;

use thiserror::Error;

/// Main error type for apkharvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Parse error in {market} adapter: {message}")]
    Parse { market: String, message: String },

    #[error("Play client is not logged in")]
    NotLoggedIn,

    #[error("APK analysis failed for {path}: {message}")]
    Analysis { path: String, message: String },

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Snapshot serialization error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown market: {0}")]
    UnknownMarket(String),
}

/// Result type alias for apkharvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{Item, ItemMeta, Request, Response, VersionData};
pub use telemetry::Telemetry;
