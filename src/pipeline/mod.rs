//! The item pipeline
//!
//! Every completed [`Item`] traverses a fixed sequence of stages: metadata
//! normalisation, dedup against the catalogue, binary and icon downloads,
//! counters, document fetches, catalogue reconciliation, analysis,
//! assetlinks verification, and the meta file write. A stage either keeps
//! the (possibly modified) item or drops it; a dropped item skips every
//! later stage.

pub mod analysis;
pub mod dedup;
pub mod documents;
pub mod download;
pub mod meta;
pub mod persist;
pub mod reconcile;

pub use analysis::{AnalysisStage, ApkAnalyzer, AssetlinksStage};
pub use dedup::{PackageRecordStage, VersionDedupStage};
pub use documents::{AdsTxtStage, PrivacyPolicyStage};
pub use download::{ApkDownloadStage, IconDownloadStage};
pub use meta::{CountersStage, UniversalMetaStage};
pub use persist::MetaPersistStage;
pub use reconcile::ReconcileStage;

use crate::config::DownloadsConfig;
use crate::crawler::Fetcher;
use crate::model::Item;
use crate::store::{Catalogue, ContentStore};
use crate::telemetry::{ErrorKind, Telemetry};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// What a stage did with an item
#[derive(Debug)]
pub enum StageOutcome {
    Keep(Item),
    Drop,
}

/// Shared services stages work against
pub struct Context {
    pub fetcher: Arc<Fetcher>,
    pub catalogue: Arc<Mutex<dyn Catalogue>>,
    pub content: Arc<ContentStore>,
    pub telemetry: Arc<Telemetry>,
    pub analyzer: Option<Arc<dyn ApkAnalyzer>>,
    pub downloads: DownloadsConfig,
}

/// One pipeline stage
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, item: Item, ctx: &Context) -> Result<StageOutcome>;
}

/// Runs items through the stage sequence
pub struct PipelineRunner {
    stages: Vec<Box<dyn Stage>>,
    ctx: Context,
}

impl PipelineRunner {
    /// The standard stage sequence
    pub fn standard(ctx: Context) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(UniversalMetaStage),
            Box::new(PackageRecordStage),
            Box::new(VersionDedupStage),
            Box::new(ApkDownloadStage),
            Box::new(IconDownloadStage),
            Box::new(CountersStage),
            Box::new(AdsTxtStage),
            Box::new(PrivacyPolicyStage),
            Box::new(ReconcileStage),
            Box::new(AnalysisStage),
            Box::new(AssetlinksStage),
            Box::new(MetaPersistStage),
        ];
        Self { stages, ctx }
    }

    /// Custom stage sequence, used by tests
    pub fn with_stages(stages: Vec<Box<dyn Stage>>, ctx: Context) -> Self {
        Self { stages, ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Runs one item through every stage
    ///
    /// A stage error drops the item after reporting; stage errors never
    /// abort the crawl.
    pub async fn run(&self, mut item: Item) -> Option<Item> {
        let identifier = item.identifier().unwrap_or("?").to_string();
        for stage in &self.stages {
            match stage.process(item, &self.ctx).await {
                Ok(StageOutcome::Keep(next)) => item = next,
                Ok(StageOutcome::Drop) => {
                    tracing::debug!(stage = stage.name(), identifier, "item dropped");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(
                        stage = stage.name(),
                        identifier,
                        error = %e,
                        "pipeline stage failed"
                    );
                    self.ctx.telemetry.error(
                        error_kind(&e),
                        &format!("stage {} failed for {}: {}", stage.name(), identifier, e),
                    );
                    return None;
                }
            }
        }
        Some(item)
    }
}

/// Telemetry classification for a failed stage
fn error_kind(error: &HarvestError) -> ErrorKind {
    match error {
        HarvestError::Store(_) | HarvestError::Io(_) | HarvestError::Snapshot(_) => {
            ErrorKind::Store
        }
        HarvestError::Parse { .. } => ErrorKind::Parse,
        HarvestError::Analysis { .. } => ErrorKind::Analysis,
        _ => ErrorKind::TransientNetwork,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::config::{CrawlerConfig, ProxyConfig, RateLimitConfig};
    use crate::crawler::{ProxyPool, RateController};
    use crate::store::SqliteCatalogue;

    /// A context wired to an in-memory catalogue and a temp content store
    pub fn context(root: &std::path::Path) -> Context {
        let crawler = CrawlerConfig {
            download_timeout_secs: 5,
            ..Default::default()
        };
        let proxies = Arc::new(ProxyPool::new(&[], true));
        let rate = Arc::new(RateController::new(RateLimitConfig::default()));
        let telemetry = Arc::new(Telemetry::with_log_reporter());
        let fetcher = Fetcher::new(
            &crawler,
            &ProxyConfig::default(),
            proxies,
            rate,
            telemetry.clone(),
            root.join("spill"),
        )
        .unwrap();

        Context {
            fetcher: Arc::new(fetcher),
            catalogue: Arc::new(Mutex::new(SqliteCatalogue::open_in_memory().unwrap())),
            content: Arc::new(ContentStore::new(root).unwrap()),
            telemetry,
            analyzer: None,
            downloads: DownloadsConfig::default(),
        }
    }

    pub fn item_with_version(version: &str, download_url: Option<&str>) -> Item {
        let mut item = Item::new("testmarket", "https://market.example.com/app/com.x");
        item.meta.pkg_name = Some("com.x".to_string());
        item.versions.insert(
            version.to_string(),
            crate::model::VersionData {
                download_url: download_url.map(str::to_string),
                ..Default::default()
            },
        );
        item
    }
}
