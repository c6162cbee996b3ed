//! HTTP fetch execution
//!
//! The fetcher turns a [`Request`] into a classified outcome: a response, a
//! retriable failure (5xx, 429, timeout, reset, proxy refusal) or a terminal
//! failure (other 4xx, malformed requests). Each fetch rotates the user
//! agent, selects a proxy from the pool, waits out the rate controller's
//! pauses, and spills large bodies to a temp file instead of buffering.

use crate::config::{CrawlerConfig, ProxyConfig};
use crate::crawler::proxy::{Acquired, ProxyPool, DIRECT};
use crate::crawler::ratelimit::RateController;
use crate::model::{Body, Method, Request, Response};
use crate::telemetry::Telemetry;
use crate::HarvestError;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Classified result of a fetch
#[derive(Debug)]
pub enum FetchOutcome {
    /// A usable response, dispatched to the adapter callback
    Fetched(Response),

    /// Transient failure; the request may be re-enqueued
    Retriable {
        request: Request,
        reason: String,
        /// Server-mandated wait for rate-limit responses
        retry_after: Option<Duration>,
    },

    /// Permanent failure; the request is dropped and reported
    Terminal {
        request: Request,
        reason: String,
        /// HTTP status when the failure was a response, None for
        /// network-level errors
        status: Option<u16>,
    },
}

/// HTTP request executor shared by all workers and pipeline stages
pub struct Fetcher {
    /// One client per proxy pool entry (reqwest proxies are per-client)
    clients: HashMap<String, reqwest::Client>,
    user_agents: Vec<String>,
    proxies: Arc<ProxyPool>,
    rate: Arc<RateController>,
    telemetry: Arc<Telemetry>,
    default_timeout: Duration,
    spill_bytes: u64,
    spill_dir: PathBuf,
    spill_counter: AtomicU64,
}

impl Fetcher {
    pub fn new(
        crawler: &CrawlerConfig,
        proxy_config: &ProxyConfig,
        proxies: Arc<ProxyPool>,
        rate: Arc<RateController>,
        telemetry: Arc<Telemetry>,
        spill_dir: PathBuf,
    ) -> crate::Result<Self> {
        std::fs::create_dir_all(&spill_dir)?;

        let mut clients = HashMap::new();
        clients.insert(DIRECT.to_string(), build_client(crawler, None)?);
        for address in &proxy_config.addresses {
            clients.insert(address.clone(), build_client(crawler, Some(address))?);
        }

        Ok(Self {
            clients,
            user_agents: crawler.user_agents.clone(),
            proxies,
            rate,
            telemetry,
            default_timeout: Duration::from_secs(crawler.download_timeout_secs),
            spill_bytes: crawler.body_spill_bytes,
            spill_dir,
            spill_counter: AtomicU64::new(0),
        })
    }

    /// Executes one request end to end
    ///
    /// Waits for the rate controller and an eligible proxy, sends, then
    /// classifies the result. Rate-limit responses cool the proxy that was
    /// used and arm the global pause before returning `Retriable`.
    pub async fn fetch(&self, request: Request) -> FetchOutcome {
        let host = request.host().unwrap_or_default();
        self.rate.pre_dispatch(&host).await;

        let proxy = self.acquire_proxy().await;
        let client = self
            .clients
            .get(&proxy)
            .unwrap_or_else(|| &self.clients[DIRECT]);

        self.rate.inflight_inc(&host);
        let result = self.send(client, &request).await;
        self.rate.inflight_dec(&host);

        match result {
            Ok((status, headers, final_url, body)) => {
                self.telemetry.record_response_code(status);

                if self.rate.is_rate_limit_code(status) {
                    let header = headers
                        .iter()
                        .find(|(n, _)| n == "retry-after")
                        .map(|(_, v)| v.as_str());
                    let retry_after = self.rate.retry_after(header);
                    self.proxies.backoff(&proxy, retry_after);
                    self.rate.on_rate_limited(&host, retry_after);
                    self.telemetry.rate_limited(&host, retry_after);
                    return FetchOutcome::Retriable {
                        request,
                        reason: format!("HTTP {}", status),
                        retry_after: Some(retry_after),
                    };
                }

                if status >= 500 || status == 408 {
                    return FetchOutcome::Retriable {
                        request,
                        reason: format!("HTTP {}", status),
                        retry_after: None,
                    };
                }

                if status >= 400 {
                    return FetchOutcome::Terminal {
                        request,
                        reason: format!("HTTP {}", status),
                        status: Some(status),
                    };
                }

                self.rate.on_success(&host);
                FetchOutcome::Fetched(Response {
                    status,
                    headers,
                    body,
                    final_url,
                    request,
                })
            }
            Err(e) => self.classify_error(request, e),
        }
    }

    async fn acquire_proxy(&self) -> String {
        loop {
            match self.proxies.acquire() {
                Acquired::Proxy(addr) => return addr,
                Acquired::Wait(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        request: &Request,
    ) -> Result<(u16, Vec<(String, String)>, String, Body), HarvestError> {
        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };

        if let Some(ua) = self.user_agents.choose(&mut rand::thread_rng()) {
            builder = builder.header(reqwest::header::USER_AGENT, ua.as_str());
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.cookies.is_empty() {
            let cookie = request
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        builder = builder.timeout(timeout);

        let mut response = builder.send().await.map_err(|e| self.wrap(&request.url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(n, v)| {
                (
                    n.as_str().to_lowercase(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = self.read_body(&mut response, &request.url).await?;
        Ok((status, headers, final_url, body))
    }

    /// Reads the body, spilling to a temp file once it crosses the threshold
    async fn read_body(
        &self,
        response: &mut reqwest::Response,
        url: &str,
    ) -> Result<Body, HarvestError> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut spill: Option<(PathBuf, std::fs::File)> = None;

        while let Some(chunk) = response.chunk().await.map_err(|e| self.wrap(url, e))? {
            if let Some((_, file)) = spill.as_mut() {
                file.write_all(&chunk)?;
                continue;
            }

            buffer.extend_from_slice(&chunk);
            if buffer.len() as u64 > self.spill_bytes {
                let path = self.next_spill_path();
                let mut file = std::fs::File::create(&path)?;
                file.write_all(&buffer)?;
                buffer.clear();
                spill = Some((path, file));
            }
        }

        match spill {
            Some((path, mut file)) => {
                file.flush()?;
                Ok(Body::File(path))
            }
            None => Ok(Body::Bytes(buffer)),
        }
    }

    fn next_spill_path(&self) -> PathBuf {
        let n = self.spill_counter.fetch_add(1, Ordering::Relaxed);
        self.spill_dir
            .join(format!("body-{}-{}.tmp", std::process::id(), n))
    }

    fn wrap(&self, url: &str, source: reqwest::Error) -> HarvestError {
        if source.is_timeout() {
            HarvestError::Timeout {
                url: url.to_string(),
            }
        } else {
            HarvestError::Http {
                url: url.to_string(),
                source,
            }
        }
    }

    fn classify_error(&self, request: Request, error: HarvestError) -> FetchOutcome {
        match &error {
            HarvestError::Timeout { .. } => FetchOutcome::Retriable {
                request,
                reason: "request timeout".to_string(),
                retry_after: None,
            },
            HarvestError::Http { source, .. }
                if source.is_connect() || source.is_request() || source.is_body() =>
            {
                FetchOutcome::Retriable {
                    request,
                    reason: format!("network error: {}", source),
                    retry_after: None,
                }
            }
            _ => FetchOutcome::Terminal {
                request,
                reason: error.to_string(),
                status: None,
            },
        }
    }
}

fn build_client(crawler: &CrawlerConfig, proxy: Option<&str>) -> crate::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(
            crawler.redirect_limit as usize,
        ))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if let Some(address) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(address)?);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::model::Callback;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_fetcher(spill_bytes: u64) -> Fetcher {
        let crawler = CrawlerConfig {
            body_spill_bytes: spill_bytes,
            download_timeout_secs: 5,
            ..Default::default()
        };
        let proxy_config = ProxyConfig::default();
        let proxies = Arc::new(ProxyPool::new(&[], true));
        let rate = Arc::new(RateController::new(RateLimitConfig::default()));
        let telemetry = Arc::new(Telemetry::with_log_reporter());
        let spill_dir = std::env::temp_dir().join(format!(
            "apkharvest-test-{}-{}",
            std::process::id(),
            rand::random::<u32>()
        ));
        Fetcher::new(&crawler, &proxy_config, proxies, rate, telemetry, spill_dir).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_small_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string("TEST"))
            .mount(&server)
            .await;

        let fetcher = test_fetcher(1024 * 1024);
        let request = Request::get(format!("{}/app", server.uri()), Callback::Similar);

        match fetcher.fetch(request).await {
            FetchOutcome::Fetched(resp) => {
                assert_eq!(resp.status, 200);
                assert_eq!(&*resp.body.bytes().unwrap(), b"TEST");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_large_body_spills_to_file() {
        let server = MockServer::start().await;
        let payload = vec![0xAAu8; 8 * 1024];
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .mount(&server)
            .await;

        let fetcher = test_fetcher(1024);
        let request = Request::get(format!("{}/big", server.uri()), Callback::Similar);

        match fetcher.fetch(request).await {
            FetchOutcome::Fetched(resp) => {
                assert!(matches!(resp.body, Body::File(_)));
                assert_eq!(resp.body.len(), 8 * 1024);
                assert_eq!(&*resp.body.bytes().unwrap(), payload.as_slice());
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spill_file_is_cleaned_up_with_the_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xAAu8; 8 * 1024]))
            .mount(&server)
            .await;

        let fetcher = test_fetcher(1024);
        let request = Request::get(format!("{}/big", server.uri()), Callback::Similar);

        let resp = match fetcher.fetch(request).await {
            FetchOutcome::Fetched(resp) => resp,
            other => panic!("expected success, got {:?}", other),
        };
        let spill_path = match &resp.body {
            Body::File(path) => path.clone(),
            Body::Bytes(_) => panic!("body should have spilled"),
        };
        assert!(spill_path.exists());
        drop(resp);
        assert!(!spill_path.exists());
    }

    #[tokio::test]
    async fn test_429_is_retriable_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
            .mount(&server)
            .await;

        let fetcher = test_fetcher(1024 * 1024);
        let request = Request::get(format!("{}/limited", server.uri()), Callback::Similar);

        match fetcher.fetch(request).await {
            FetchOutcome::Retriable { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("expected retriable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_500_is_retriable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = test_fetcher(1024 * 1024);
        let request = Request::get(format!("{}/err", server.uri()), Callback::Similar);
        assert!(matches!(
            fetcher.fetch(request).await,
            FetchOutcome::Retriable { retry_after: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_404_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = test_fetcher(1024 * 1024);
        let request = Request::get(format!("{}/gone", server.uri()), Callback::Similar);
        assert!(matches!(
            fetcher.fetch(request).await,
            FetchOutcome::Terminal { .. }
        ));
    }

    #[tokio::test]
    async fn test_post_body_and_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(wiremock::matchers::header("x-dfe-device-id", "abc123"))
            .and(wiremock::matchers::body_bytes(b"doc=com.x".to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let fetcher = test_fetcher(1024 * 1024);
        let mut request = Request::post(
            format!("{}/rpc", server.uri()),
            b"doc=com.x".to_vec(),
            Callback::Similar,
        );
        request
            .headers
            .insert("x-dfe-device-id".to_string(), "abc123".to_string());

        assert!(matches!(
            fetcher.fetch(request).await,
            FetchOutcome::Fetched(_)
        ));
    }
}
