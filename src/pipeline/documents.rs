//! Developer document stages: ads.txt and privacy policy

use crate::crawler::FetchOutcome;
use crate::model::{Callback, Item, Request};
use crate::pipeline::{Context, Stage, StageOutcome};
use crate::web;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::time::Duration;

const ADS_TIMEOUT: Duration = Duration::from_secs(3);
const PRIVACY_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches `app-ads.txt` and `ads.txt` from the developer's site root
///
/// Files are stored content-named (`app_ads.<sha256>.txt`) so a changed
/// file gets a new artifact and an unchanged one overwrites itself. Sites
/// without the files, or without a developer website at all, are a quiet
/// no-op.
pub struct AdsTxtStage;

#[async_trait]
impl Stage for AdsTxtStage {
    fn name(&self) -> &'static str {
        "ads_txt"
    }

    async fn process(&self, item: Item, ctx: &Context) -> Result<StageOutcome> {
        let website = match &item.meta.developer_website {
            Some(url) => url.clone(),
            None => return Ok(StageOutcome::Keep(item)),
        };
        let root = match web::site_root(&website) {
            Some(root) => root,
            None => {
                tracing::debug!(website, "no usable site root for ads.txt");
                return Ok(StageOutcome::Keep(item));
            }
        };
        let identifier = item.identifier().unwrap_or_default().to_string();

        for (file, prefix) in [("app-ads.txt", "app_ads"), ("ads.txt", "ads")] {
            let request = Request::get(format!("{}/{}", root, file), Callback::Artifact)
                .dont_filter()
                .with_timeout(ADS_TIMEOUT);

            if let FetchOutcome::Fetched(response) = ctx.fetcher.fetch(request).await {
                if response.is_success() && !response.body.is_empty() {
                    let bytes = response.body.bytes()?;
                    let digest = hex::encode(Sha256::digest(&bytes));
                    let filename = format!("{}.{}.txt", prefix, digest);
                    ctx.content
                        .write_artifact(&item.meta.market, &identifier, &filename, &bytes)?;
                }
            }
        }

        Ok(StageOutcome::Keep(item))
    }
}

/// Fetches the privacy policy and records the response status
///
/// The status is recorded whatever it is; a 404 policy link is itself a
/// finding worth keeping in the meta file.
pub struct PrivacyPolicyStage;

#[async_trait]
impl Stage for PrivacyPolicyStage {
    fn name(&self) -> &'static str {
        "privacy_policy"
    }

    async fn process(&self, mut item: Item, ctx: &Context) -> Result<StageOutcome> {
        let policy_url = match &item.meta.privacy_policy_url {
            Some(url) => url.clone(),
            None => return Ok(StageOutcome::Keep(item)),
        };
        let identifier = item.identifier().unwrap_or_default().to_string();

        let request = Request::get(policy_url.clone(), Callback::Artifact)
            .dont_filter()
            .with_timeout(PRIVACY_TIMEOUT);

        match ctx.fetcher.fetch(request).await {
            FetchOutcome::Fetched(response) => {
                item.meta.privacy_policy_status = Some(response.status);
                if response.is_success() && !response.body.is_empty() {
                    let bytes = response.body.bytes()?;
                    let filename = format!("privacy_policy.{}.html", Utc::now().timestamp());
                    ctx.content
                        .write_artifact(&item.meta.market, &identifier, &filename, &bytes)?;
                }
            }
            FetchOutcome::Terminal { reason, status, .. } => {
                item.meta.privacy_policy_status = status;
                tracing::debug!(identifier, url = policy_url, reason, "privacy policy fetch failed");
            }
            FetchOutcome::Retriable { reason, .. } => {
                tracing::debug!(identifier, url = policy_url, reason, "privacy policy fetch failed");
            }
        }

        Ok(StageOutcome::Keep(item))
    }
}
