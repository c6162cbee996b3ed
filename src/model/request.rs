use crate::model::Item;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// HTTP method for a crawl request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// The callback a response is dispatched to, with its typed payload
///
/// In-flight state between callbacks rides here instead of in a string-keyed
/// meta bag: a partially filled [`Item`], a delivery token, the version a
/// download belongs to. The whole enum round-trips through the job-directory
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Callback {
    /// A marketplace listing page
    List { page: u32 },
    /// The per-package version list
    VersionList { item: Item },
    /// The package detail page or details RPC
    Detail { item: Item },
    /// Play-like purchase RPC; yields a delivery token
    Purchase { item: Item, version: String },
    /// Play-like delivery RPC; consumes the purchase token
    Delivery {
        item: Item,
        version: String,
        token: String,
    },
    /// A per-version download page
    DownloadPage { item: Item, version: String },
    /// A "similar apps" discovery page
    Similar,
    /// Direct pipeline fetch (binary, icon, document); never dispatched to
    /// an adapter
    Artifact,
}

impl Callback {
    /// Short name used in logs and telemetry
    pub fn kind(&self) -> &'static str {
        match self {
            Callback::List { .. } => "list",
            Callback::VersionList { .. } => "version_list",
            Callback::Detail { .. } => "detail",
            Callback::Purchase { .. } => "purchase",
            Callback::Delivery { .. } => "delivery",
            Callback::DownloadPage { .. } => "download_page",
            Callback::Similar => "similar",
            Callback::Artifact => "artifact",
        }
    }
}

/// A unit of pending work owned by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub url: String,

    #[serde(default)]
    pub method: Method,

    #[serde(default)]
    pub body: Option<Vec<u8>>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// Higher values are dispatched first; ties are FIFO
    #[serde(default)]
    pub priority: i32,

    pub callback: Callback,

    /// Attempts made so far; incremented on retriable failure
    #[serde(default)]
    pub attempt: u32,

    /// Bypass the duplicate-request filter
    #[serde(default)]
    pub dont_filter: bool,

    /// Callback depth from the seed that spawned this request
    #[serde(default)]
    pub depth: u32,

    /// Per-request deadline override in milliseconds (ads/privacy fetches
    /// use tight timeouts); None means the crawler-wide download timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Request {
    /// Creates a GET request with default priority
    pub fn get(url: impl Into<String>, callback: Callback) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            body: None,
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            priority: 0,
            callback,
            attempt: 0,
            dont_filter: false,
            depth: 0,
            timeout_ms: None,
        }
    }

    /// Creates a POST request with the given body
    pub fn post(url: impl Into<String>, body: Vec<u8>, callback: Callback) -> Self {
        Self {
            body: Some(body),
            method: Method::Post,
            ..Self::get(url, callback)
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn dont_filter(mut self) -> Self {
        self.dont_filter = true;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// The registered host this request targets, lowercased
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }

    /// Duplicate-detection fingerprint over `(method, url, body)`
    ///
    /// Two requests with the same fingerprint are the same unit of work; the
    /// callback and priority deliberately do not participate.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(match self.method {
            Method::Get => b"GET" as &[u8],
            Method::Post => b"POST",
        });
        hasher.update(b"\n");
        hasher.update(self.url.as_bytes());
        hasher.update(b"\n");
        if let Some(body) = &self.body {
            hasher.update(body);
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_same_for_equal_work() {
        let a = Request::get("https://market.example.com/app/com.x", Callback::Similar);
        let b = Request::get("https://market.example.com/app/com.x", Callback::List { page: 3 })
            .with_priority(99);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_differs_on_url() {
        let a = Request::get("https://market.example.com/app/com.x", Callback::Similar);
        let b = Request::get("https://market.example.com/app/com.y", Callback::Similar);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_differs_on_method_and_body() {
        let get = Request::get("https://market.example.com/rpc", Callback::Similar);
        let post = Request::post(
            "https://market.example.com/rpc",
            b"doc=com.x".to_vec(),
            Callback::Similar,
        );
        assert_ne!(get.fingerprint(), post.fingerprint());

        let post2 = Request::post(
            "https://market.example.com/rpc",
            b"doc=com.y".to_vec(),
            Callback::Similar,
        );
        assert_ne!(post.fingerprint(), post2.fingerprint());
    }

    #[test]
    fn test_host_is_lowercased() {
        let req = Request::get("https://Market.EXAMPLE.com/x", Callback::Similar);
        assert_eq!(req.host(), Some("market.example.com".to_string()));
    }

    #[test]
    fn test_request_roundtrips_through_json() {
        let req = Request::post(
            "https://market.example.com/rpc",
            vec![0, 159, 146, 150],
            Callback::List { page: 2 },
        )
        .with_priority(-1)
        .with_depth(3);

        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(back.url, req.url);
        assert_eq!(back.body, req.body);
        assert_eq!(back.priority, -1);
        assert_eq!(back.depth, 3);
        assert_eq!(back.fingerprint(), req.fingerprint());
    }
}
