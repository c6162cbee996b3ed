//! Per-host rate control
//!
//! Dual control loop: an acute reaction to 429 (global dispatch pause for the
//! Retry-After window, proxy cooldown) and a chronic per-host `base_pause`
//! that grows a little on every rate-limit event and decays on successes.
//! The politeness floor survives bursts without a permanent slow-down.

use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Retry-After values are capped here regardless of what the server sends
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

#[derive(Debug, Default)]
struct HostState {
    inflight: u32,
    base_pause: Duration,
    last_429: Option<Instant>,
    last_increment: Option<Instant>,
}

/// Shared per-host rate control state
pub struct RateController {
    hosts: Mutex<HashMap<String, HostState>>,
    paused_until: Mutex<Option<Instant>>,
    config: RateLimitConfig,
}

impl RateController {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            paused_until: Mutex::new(None),
            config,
        }
    }

    /// Whether a status code is treated as rate limiting
    pub fn is_rate_limit_code(&self, status: u16) -> bool {
        self.config.codes.contains(&status)
    }

    /// Resolves the wait from an optional Retry-After header value
    ///
    /// Accepts delta-seconds or an HTTP-date; falls back to the configured
    /// default and is always capped at [`MAX_RETRY_AFTER`].
    pub fn retry_after(&self, header: Option<&str>) -> Duration {
        let wait = header
            .and_then(parse_retry_after)
            .unwrap_or(Duration::from_secs(self.config.default_backoff_secs));
        wait.min(MAX_RETRY_AFTER)
    }

    /// Records a rate-limit event on a host
    ///
    /// Arms the global dispatch pause for the retry window and bumps the
    /// host's base pause by `base_inc`, at most once per configured interval
    /// so a burst of parallel 429s counts as one event.
    pub fn on_rate_limited(&self, host: &str, retry_after: Duration) {
        let now = Instant::now();

        {
            let mut hosts = self.hosts.lock().unwrap();
            let state = hosts.entry(host.to_string()).or_default();
            state.last_429 = Some(now);

            let spaced_out = state
                .last_increment
                .map(|at| now.duration_since(at) >= Duration::from_secs(self.config.interval_secs))
                .unwrap_or(true);
            if spaced_out {
                state.base_pause += Duration::from_millis(self.config.base_inc_ms);
                state.last_increment = Some(now);
            }
        }

        let until = now + retry_after;
        let mut paused = self.paused_until.lock().unwrap();
        match *paused {
            Some(existing) if existing >= until => {}
            _ => *paused = Some(until),
        }
    }

    /// Records a successful (non-rate-limited) response on a host
    ///
    /// Decays the chronic base pause toward zero.
    pub fn on_success(&self, host: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        if let Some(state) = hosts.get_mut(host) {
            state.base_pause = state
                .base_pause
                .saturating_sub(Duration::from_millis(self.config.decay_ms));
        }
    }

    /// Current chronic pause for a host
    pub fn base_pause(&self, host: &str) -> Duration {
        self.hosts
            .lock()
            .unwrap()
            .get(host)
            .map(|s| s.base_pause)
            .unwrap_or(Duration::ZERO)
    }

    /// Remaining global pause, if one is armed
    pub fn pause_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut paused = self.paused_until.lock().unwrap();
        match *paused {
            Some(until) if until > now => Some(until - now),
            Some(_) => {
                *paused = None;
                None
            }
            None => None,
        }
    }

    /// Sleeps through the global pause and the host's base pause
    ///
    /// Called before every dispatch. In-flight fetches are unaffected; this
    /// only delays new dispatches.
    pub async fn pre_dispatch(&self, host: &str) {
        while let Some(remaining) = self.pause_remaining() {
            tokio::time::sleep(remaining.min(Duration::from_millis(250))).await;
        }

        let pause = self.base_pause(host);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    pub fn inflight_inc(&self, host: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        hosts.entry(host.to_string()).or_default().inflight += 1;
    }

    pub fn inflight_dec(&self, host: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        if let Some(state) = hosts.get_mut(host) {
            state.inflight = state.inflight.saturating_sub(1);
        }
    }

    pub fn inflight(&self, host: &str) -> u32 {
        self.hosts
            .lock()
            .unwrap()
            .get(host)
            .map(|s| s.inflight)
            .unwrap_or(0)
    }
}

/// Parses a Retry-After header value: delta-seconds or HTTP-date
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.signed_duration_since(chrono::Utc::now());
    delta.to_std().ok()
}
