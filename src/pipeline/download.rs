//! Binary and icon download stages

use crate::crawler::FetchOutcome;
use crate::model::{Callback, Item, Request};
use crate::pipeline::{Context, Stage, StageOutcome};
use crate::telemetry::ErrorKind;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;

/// Download requests outrank everything in flight so an item completes
/// before new discovery work starts
const DOWNLOAD_PRIORITY: i32 = 100;

/// Fetches each version's binary and commits it to the content store
///
/// Versions flagged `skip` by the dedup stage and versions without a
/// download URL are left untouched; a failed fetch records
/// `file_success = false` and the item continues down the pipeline.
pub struct ApkDownloadStage;

#[async_trait]
impl Stage for ApkDownloadStage {
    fn name(&self) -> &'static str {
        "apk_download"
    }

    async fn process(&self, mut item: Item, ctx: &Context) -> Result<StageOutcome> {
        if !ctx.downloads.apk {
            return Ok(StageOutcome::Keep(item));
        }

        let identifier = item.identifier().unwrap_or_default().to_string();
        let versions: Vec<String> = item.versions.keys().cloned().collect();

        for version in versions {
            let (url, headers, cookies) = {
                let data = &item.versions[&version];
                if data.skip {
                    continue;
                }
                let url = match &data.download_url {
                    Some(url) => url.clone(),
                    None => continue,
                };
                (url, data.headers.clone(), data.cookies.clone())
            };

            let mut request = Request::get(url.clone(), Callback::Artifact)
                .with_priority(DOWNLOAD_PRIORITY)
                .dont_filter();
            request.headers = headers;
            request.cookies = cookies;

            let outcome = ctx.fetcher.fetch(request).await;
            let data = match item.versions.get_mut(&version) {
                Some(data) => data,
                None => continue,
            };
            match outcome {
                FetchOutcome::Fetched(response) if response.is_success() => {
                    let ingested = ctx.content.ingest_body(&response.body)?;
                    let path = ctx.content.commit_apk(&ingested)?;
                    tracing::info!(
                        identifier,
                        version,
                        sha256 = %ingested.sha256,
                        size = ingested.size,
                        "binary stored"
                    );
                    data.file_path = Some(path);
                    data.file_sha256 = Some(ingested.sha256);
                    data.file_md5 = Some(ingested.md5);
                    data.file_size = Some(ingested.size);
                    data.file_success = Some(true);
                }
                outcome => {
                    let reason = match outcome {
                        FetchOutcome::Fetched(response) => format!("HTTP {}", response.status),
                        FetchOutcome::Retriable { reason, .. }
                        | FetchOutcome::Terminal { reason, .. } => reason,
                    };
                    tracing::warn!(identifier, version, url, reason, "binary download failed");
                    ctx.telemetry.error(
                        ErrorKind::TransientNetwork,
                        &format!("download of {} failed: {}", url, reason),
                    );
                    data.file_success = Some(false);
                }
            }
        }

        Ok(StageOutcome::Keep(item))
    }
}

/// Fetches the item's icon into the per-package artifact directory
pub struct IconDownloadStage;

#[async_trait]
impl Stage for IconDownloadStage {
    fn name(&self) -> &'static str {
        "icon_download"
    }

    async fn process(&self, item: Item, ctx: &Context) -> Result<StageOutcome> {
        if !ctx.downloads.icon {
            return Ok(StageOutcome::Keep(item));
        }
        let icon_url = match &item.meta.icon_url {
            Some(url) => url.clone(),
            None => return Ok(StageOutcome::Keep(item)),
        };
        let identifier = item.identifier().unwrap_or_default().to_string();

        let request = Request::get(icon_url.clone(), Callback::Artifact)
            .with_priority(DOWNLOAD_PRIORITY)
            .dont_filter();

        match ctx.fetcher.fetch(request).await {
            FetchOutcome::Fetched(response) if response.is_success() => {
                let bytes = response.body.bytes()?;
                let filename = format!("icon.{}.ico", Utc::now().timestamp());
                ctx.content
                    .write_artifact(&item.meta.market, &identifier, &filename, &bytes)?;
            }
            _ => {
                tracing::debug!(identifier, url = icon_url, "icon download failed");
            }
        }

        Ok(StageOutcome::Keep(item))
    }
}
