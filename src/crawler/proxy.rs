//! Proxy pool with per-proxy cooldown
//!
//! The pool hands out a random eligible proxy per fetch. A proxy that
//! triggered a rate limit is cooled until a future instant and must not be
//! selected before then. Selection is random, not exclusive: two concurrent
//! fetches may receive the same proxy.

use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Address of the direct (no-proxy) pool entry
pub const DIRECT: &str = "direct";

/// Result of an acquire attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    /// An eligible proxy address ("direct" for no proxy)
    Proxy(String),
    /// No proxy eligible; wait this long before retrying
    Wait(Duration),
}

/// Shared pool of proxies with cooldown timestamps
pub struct ProxyPool {
    entries: Mutex<HashMap<String, Option<Instant>>>,
}

impl ProxyPool {
    /// Creates a pool from configured addresses
    ///
    /// The pool is never empty: with no addresses, or with `allow_direct`,
    /// a direct entry is present.
    pub fn new(addresses: &[String], allow_direct: bool) -> Self {
        let mut entries: HashMap<String, Option<Instant>> = HashMap::new();
        for addr in addresses {
            entries.insert(addr.clone(), None);
        }
        if allow_direct || entries.is_empty() {
            entries.insert(DIRECT.to_string(), None);
        }
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Returns a random eligible proxy, or the minimum wait until one frees up
    ///
    /// Elapsed cooldowns are cleared as a side effect.
    pub fn acquire(&self) -> Acquired {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        for cooldown in entries.values_mut() {
            if matches!(cooldown, Some(until) if *until <= now) {
                *cooldown = None;
            }
        }

        let eligible = entries
            .iter()
            .filter(|(_, cooldown)| cooldown.is_none())
            .map(|(addr, _)| addr.clone())
            .choose(&mut rand::thread_rng());

        if let Some(addr) = eligible {
            return Acquired::Proxy(addr);
        }

        // Everything is cooling; report the earliest expiry
        let min_wait = entries
            .values()
            .filter_map(|cooldown| cooldown.map(|until| until.saturating_duration_since(now)))
            .min()
            .unwrap_or(Duration::from_millis(100));
        Acquired::Wait(min_wait.max(Duration::from_millis(1)))
    }

    /// Cools a proxy for the given duration
    ///
    /// If a later cooldown is already set, the existing value wins.
    pub fn backoff(&self, address: &str, duration: Duration) {
        let until = Instant::now() + duration;
        let mut entries = self.entries.lock().unwrap();
        let cooldown = entries.entry(address.to_string()).or_insert(None);
        match cooldown {
            Some(existing) if *existing >= until => {}
            _ => *cooldown = Some(until),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_is_never_empty() {
        let pool = ProxyPool::new(&[], false);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.acquire(), Acquired::Proxy(DIRECT.to_string()));
    }

    #[test]
    fn test_direct_entry_added_when_allowed() {
        let pool = ProxyPool::new(&["socks5://p1:1080".to_string()], true);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_cooled_proxy_is_never_chosen() {
        let pool = ProxyPool::new(&["p1".to_string(), "p2".to_string()], false);
        pool.backoff("p1", Duration::from_secs(60));

        for _ in 0..50 {
            match pool.acquire() {
                Acquired::Proxy(addr) => assert_eq!(addr, "p2"),
                Acquired::Wait(_) => panic!("p2 should be eligible"),
            }
        }
    }

    #[test]
    fn test_cooldown_elapses() {
        let pool = ProxyPool::new(&["p1".to_string(), "p2".to_string()], false);
        pool.backoff("p1", Duration::from_millis(10));
        pool.backoff("p2", Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(15));

        // Only p1 has elapsed at t=15ms
        match pool.acquire() {
            Acquired::Proxy(addr) => assert_eq!(addr, "p1"),
            Acquired::Wait(_) => panic!("p1 cooldown should have elapsed"),
        }
    }

    #[test]
    fn test_exhausted_pool_reports_minimum_wait() {
        let pool = ProxyPool::new(&["p1".to_string(), "p2".to_string()], false);
        pool.backoff("p1", Duration::from_millis(100));
        pool.backoff("p2", Duration::from_millis(100));

        match pool.acquire() {
            Acquired::Wait(wait) => {
                assert!(wait > Duration::ZERO);
                assert!(wait <= Duration::from_millis(100));
            }
            Acquired::Proxy(addr) => panic!("unexpected eligible proxy {}", addr),
        }

        std::thread::sleep(Duration::from_millis(110));
        assert!(matches!(pool.acquire(), Acquired::Proxy(_)));
    }

    #[test]
    fn test_later_cooldown_wins() {
        let pool = ProxyPool::new(&["p1".to_string()], false);
        pool.backoff("p1", Duration::from_millis(200));
        // A shorter cooldown must not shorten the existing one
        pool.backoff("p1", Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(pool.acquire(), Acquired::Wait(_)));
    }
}
