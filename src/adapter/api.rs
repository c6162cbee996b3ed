//! API-driven marketplace adapter
//!
//! Markets with a Play-style RPC surface resolve a download in three hops:
//! a details RPC yields metadata and the latest version, a purchase RPC
//! yields a delivery token, and a delivery RPC yields the signed download
//! URL plus an auth cookie. [`ApiAdapter`] drives the chain; the
//! market-specific wire format lives behind [`PlayClient`].

use crate::adapter::{ParseOutcome, SiteAdapter};
use crate::model::{Callback, Item, Request, Response};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// Decoded details RPC payload
#[derive(Debug, Clone, Default)]
pub struct DetailInfo {
    pub pkg_name: Option<String>,
    pub version: Option<String>,
    pub version_code: Option<i64>,
    pub icon_url: Option<String>,
    pub developer_website: Option<String>,
    pub privacy_policy_url: Option<String>,
}

/// Decoded delivery RPC payload
#[derive(Debug, Clone)]
pub struct DeliveryInfo {
    pub download_url: String,
    /// Cookie required by the CDN for the binary fetch, `(name, value)`
    pub auth_cookie: Option<(String, String)>,
}

/// Wire-format seam for a Play-style RPC surface
///
/// Implementations own credentials, device identity and payload decoding.
/// All decode methods receive the raw response body.
#[async_trait]
pub trait PlayClient: Send + Sync {
    /// Performs the login handshake; called once before any RPC request is
    /// built
    async fn login(&self) -> Result<()>;

    fn details_url(&self, package: &str) -> String;

    fn decode_details(&self, body: &[u8]) -> Result<DetailInfo>;

    /// Purchase RPC endpoint and body for a package version
    fn purchase_request(&self, package: &str, version_code: i64) -> (String, Vec<u8>);

    /// Extracts the delivery token from a purchase response
    fn decode_purchase(&self, body: &[u8]) -> Result<String>;

    fn delivery_url(&self, package: &str, version_code: i64, token: &str) -> String;

    fn decode_delivery(&self, body: &[u8]) -> Result<DeliveryInfo>;

    /// Extra headers attached to every RPC request (auth, device id)
    fn rpc_headers(&self) -> Vec<(String, String)>;
}

/// Generic adapter over any [`PlayClient`]
pub struct ApiAdapter<C> {
    name: String,
    client: C,
    logged_in: AtomicBool,
}

impl<C: PlayClient> ApiAdapter<C> {
    pub fn new(name: impl Into<String>, client: C) -> Self {
        Self {
            name: name.into(),
            client,
            logged_in: AtomicBool::new(false),
        }
    }

    async fn ensure_login(&self) -> Result<()> {
        if self.logged_in.load(Ordering::Acquire) {
            return Ok(());
        }
        self.client.login().await?;
        self.logged_in.store(true, Ordering::Release);
        Ok(())
    }

    fn rpc_request(&self, url: String, callback: Callback) -> Request {
        let mut request = Request::get(url, callback);
        for (name, value) in self.client.rpc_headers() {
            request.headers.insert(name, value);
        }
        request
    }

    fn version_code(item: &Item, version: &str) -> Result<i64> {
        item.versions
            .get(version)
            .and_then(|v| v.code)
            .ok_or_else(|| HarvestError::Parse {
                market: item.meta.market.clone(),
                message: format!("no version code recorded for {}", version),
            })
    }
}

#[async_trait]
impl<C: PlayClient> SiteAdapter for ApiAdapter<C> {
    fn name(&self) -> &str {
        &self.name
    }

    /// API markets have no listing walk; crawls are seeded from package
    /// files or the catalogue
    async fn seed_requests(&self) -> Result<Vec<Request>> {
        self.ensure_login().await?;
        Ok(Vec::new())
    }

    fn url_by_package(&self, package: &str) -> Option<Request> {
        if !self.logged_in.load(Ordering::Acquire) {
            tracing::warn!(market = %self.name, "details request before login");
            return None;
        }
        let url = self.client.details_url(package);
        let mut item = Item::new(self.name.clone(), url.clone());
        item.meta.pkg_name = Some(package.to_string());
        Some(self.rpc_request(url, Callback::Detail { item }))
    }

    async fn parse_detail(&self, response: &Response, mut item: Item) -> Result<ParseOutcome> {
        if !self.logged_in.load(Ordering::Acquire) {
            return Err(HarvestError::NotLoggedIn);
        }
        let body = response.body.bytes()?;
        let details = self.client.decode_details(&body)?;

        if let Some(pkg) = details.pkg_name {
            item.meta.pkg_name = Some(pkg);
        }
        item.meta.icon_url = details.icon_url;
        item.meta.developer_website = details.developer_website;
        item.meta.privacy_policy_url = details.privacy_policy_url;

        let (version, code) = match (details.version, details.version_code) {
            (Some(v), Some(c)) => (v, c),
            _ => {
                return Err(HarvestError::Parse {
                    market: self.name.clone(),
                    message: format!("details response without a version: {}", item.meta.url),
                })
            }
        };

        item.versions.entry(version.clone()).or_default().code = Some(code);

        let package = item.identifier().unwrap_or_default().to_string();
        let (url, body) = self.client.purchase_request(&package, code);
        let mut request = self.rpc_request(url, Callback::Purchase { item, version });
        request.method = crate::model::Method::Post;
        request.body = Some(body);
        Ok(ParseOutcome::with_requests(vec![request]))
    }

    async fn parse_download_page(
        &self,
        response: &Response,
        mut item: Item,
        version: String,
    ) -> Result<ParseOutcome> {
        let body = response.body.bytes()?;

        match &response.request.callback {
            Callback::Purchase { .. } => {
                let token = self.client.decode_purchase(&body)?;
                let code = Self::version_code(&item, &version)?;
                let package = item.identifier().unwrap_or_default().to_string();
                let url = self.client.delivery_url(&package, code, &token);
                let request = self.rpc_request(
                    url,
                    Callback::Delivery {
                        item,
                        version,
                        token,
                    },
                );
                Ok(ParseOutcome::with_requests(vec![request]))
            }
            Callback::Delivery { .. } => {
                let delivery = self.client.decode_delivery(&body)?;
                let data = item.versions.entry(version).or_default();
                data.download_url = Some(delivery.download_url);
                if let Some((name, value)) = delivery.auth_cookie {
                    data.cookies.insert(name, value);
                }
                Ok(ParseOutcome::with_item(item))
            }
            other => Err(HarvestError::Parse {
                market: self.name.clone(),
                message: format!("unexpected callback {} in download chain", other.kind()),
            }),
        }
    }
}
