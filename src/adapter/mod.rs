//! Marketplace adapters
//!
//! A [`SiteAdapter`] owns everything marketplace-specific: seed URLs, page
//! parsing, the request chains that end in a download URL. The crawler core
//! only ever sees [`Request`]s, [`Response`]s and [`Item`]s. Adapters are
//! capability-based: a market without version lists simply never emits a
//! `VersionList` request, and the corresponding parser is never called.

pub mod api;
pub mod fdroid;
pub mod package_file;

pub use api::{ApiAdapter, DeliveryInfo, DetailInfo, PlayClient};
pub use fdroid::FdroidAdapter;
pub use package_file::PackageFileAdapter;

use crate::model::{Callback, Item, Request, Response};
use crate::Result;
use async_trait::async_trait;

/// What a parse callback produced: follow-up requests and completed items
/// handed to the pipeline
///
/// Most callbacks complete at most one item; index-style markets complete
/// one per package in a single response.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub requests: Vec<Request>,
    pub items: Vec<Item>,
}

impl ParseOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_requests(requests: Vec<Request>) -> Self {
        Self {
            requests,
            items: Vec::new(),
        }
    }

    pub fn with_item(item: Item) -> Self {
        Self {
            requests: Vec::new(),
            items: vec![item],
        }
    }
}

/// A marketplace-specific crawler frontend
///
/// The provided [`parse`](SiteAdapter::parse) dispatches on the response's
/// callback; implementors override only the capabilities their market has.
/// Default implementations return an empty outcome, so an unsupported
/// callback degrades to a no-op instead of an error.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Market name, used for config lookup, log routing and storage paths
    fn name(&self) -> &str;

    /// The initial requests that start a crawl of this market
    async fn seed_requests(&self) -> Result<Vec<Request>>;

    /// Detail-page URL for a known package identifier, used when seeding
    /// from package files or the catalogue
    fn url_by_package(&self, package: &str) -> Option<Request>;

    async fn parse_list(&self, _response: &Response, _page: u32) -> Result<ParseOutcome> {
        Ok(ParseOutcome::none())
    }

    async fn parse_version_list(&self, _response: &Response, _item: Item) -> Result<ParseOutcome> {
        Ok(ParseOutcome::none())
    }

    async fn parse_detail(&self, _response: &Response, _item: Item) -> Result<ParseOutcome> {
        Ok(ParseOutcome::none())
    }

    /// Handles the whole download-resolution family: download pages and the
    /// purchase/delivery RPC chain
    async fn parse_download_page(
        &self,
        _response: &Response,
        _item: Item,
        _version: String,
    ) -> Result<ParseOutcome> {
        Ok(ParseOutcome::none())
    }

    async fn parse_similar(&self, _response: &Response) -> Result<ParseOutcome> {
        Ok(ParseOutcome::none())
    }

    /// Dispatches a response to the capability its callback names
    async fn parse(&self, response: Response) -> Result<ParseOutcome> {
        match response.request.callback.clone() {
            Callback::List { page } => self.parse_list(&response, page).await,
            Callback::VersionList { item } => self.parse_version_list(&response, item).await,
            Callback::Detail { item } => self.parse_detail(&response, item).await,
            Callback::Purchase { item, version }
            | Callback::Delivery { item, version, .. }
            | Callback::DownloadPage { item, version } => {
                self.parse_download_page(&response, item, version).await
            }
            Callback::Similar => self.parse_similar(&response).await,
            Callback::Artifact => Ok(ParseOutcome::none()),
        }
    }
}

/// Builds the adapter for a configured market
///
/// The market's config table names its adapter family in `type`; the rest
/// of the table is family-specific.
pub fn build_adapter(
    name: &str,
    table: &toml::Value,
) -> crate::ConfigResult<std::sync::Arc<dyn SiteAdapter>> {
    let family = table
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or(name);

    match family {
        "fdroid" => {
            let repo = table
                .get("repo")
                .and_then(|r| r.as_str())
                .ok_or_else(|| {
                    crate::ConfigError::Validation(format!(
                        "market '{}' needs a 'repo' url",
                        name
                    ))
                })?;
            Ok(std::sync::Arc::new(FdroidAdapter::new(name, repo)))
        }
        other => Err(crate::ConfigError::UnknownMarket(other.to_string())),
    }
}
