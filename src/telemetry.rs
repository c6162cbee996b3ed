//! Counters and event reporting
//!
//! The telemetry hook is the only user-visible surface besides the log
//! stream: per-market counters, a response-code histogram, and an
//! [`EventReporter`] for rate-limit and error events. The default reporter
//! writes structured log lines; alternative sinks implement the trait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Error kinds reported to telemetry, one per policy row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimited,
    TransientNetwork,
    PermanentHttp,
    Parse,
    Analysis,
    DedupMismatch,
    Store,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::PermanentHttp => "permanent_http",
            ErrorKind::Parse => "parse",
            ErrorKind::Analysis => "analysis",
            ErrorKind::DedupMismatch => "dedup_mismatch",
            ErrorKind::Store => "store",
            ErrorKind::Config => "config",
        }
    }
}

/// Sink for rate-limit and error events
pub trait EventReporter: Send + Sync {
    fn rate_limited(&self, host: &str, retry_after: Duration);
    fn error(&self, kind: ErrorKind, detail: &str);
}

/// Default reporter: structured log lines via `tracing`
pub struct LogReporter;

impl EventReporter for LogReporter {
    fn rate_limited(&self, host: &str, retry_after: Duration) {
        tracing::warn!(host, retry_after_secs = retry_after.as_secs(), "rate limited");
    }

    fn error(&self, kind: ErrorKind, detail: &str) {
        tracing::warn!(kind = kind.as_str(), detail, "crawl error");
    }
}

/// Per-market counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketCounters {
    pub items: u64,
    pub apks: u64,
    pub apk_bytes: u64,
    pub versions: u64,
}

/// Shared telemetry state
pub struct Telemetry {
    markets: Mutex<HashMap<String, MarketCounters>>,
    response_codes: Mutex<HashMap<u16, u64>>,
    errors: Mutex<HashMap<ErrorKind, u64>>,
    reporter: Box<dyn EventReporter>,
}

impl Telemetry {
    pub fn new(reporter: Box<dyn EventReporter>) -> Self {
        Self {
            markets: Mutex::new(HashMap::new()),
            response_codes: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            reporter,
        }
    }

    pub fn with_log_reporter() -> Self {
        Self::new(Box::new(LogReporter))
    }

    pub fn record_item(&self, market: &str) {
        let mut markets = self.markets.lock().unwrap();
        markets.entry(market.to_string()).or_default().items += 1;
    }

    pub fn record_apk(&self, market: &str, bytes: u64) {
        let mut markets = self.markets.lock().unwrap();
        let counters = markets.entry(market.to_string()).or_default();
        counters.apks += 1;
        counters.apk_bytes += bytes;
    }

    pub fn record_versions(&self, market: &str, count: u64) {
        let mut markets = self.markets.lock().unwrap();
        markets.entry(market.to_string()).or_default().versions += count;
    }

    pub fn record_response_code(&self, status: u16) {
        let mut codes = self.response_codes.lock().unwrap();
        *codes.entry(status).or_insert(0) += 1;
    }

    pub fn rate_limited(&self, host: &str, retry_after: Duration) {
        self.record_error_count(ErrorKind::RateLimited);
        self.reporter.rate_limited(host, retry_after);
    }

    pub fn error(&self, kind: ErrorKind, detail: &str) {
        self.record_error_count(kind);
        self.reporter.error(kind, detail);
    }

    fn record_error_count(&self, kind: ErrorKind) {
        let mut errors = self.errors.lock().unwrap();
        *errors.entry(kind).or_insert(0) += 1;
    }

    pub fn market_counters(&self, market: &str) -> MarketCounters {
        self.markets
            .lock()
            .unwrap()
            .get(market)
            .copied()
            .unwrap_or_default()
    }

    pub fn response_code_count(&self, status: u16) -> u64 {
        self.response_codes
            .lock()
            .unwrap()
            .get(&status)
            .copied()
            .unwrap_or(0)
    }

    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        self.errors.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::with_log_reporter()
    }
}
