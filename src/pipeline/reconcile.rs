//! Catalogue reconciliation stage
//!
//! Runs after the downloads: records new binaries and version rows, and
//! resolves digest collisions against the catalogue. If the catalogue
//! already maps this digest to a different path, the freshly written copy
//! is discarded and the item rewritten to point at the canonical one.

use crate::model::Item;
use crate::pipeline::{Context, Stage, StageOutcome};
use crate::store::catalogue::DownloadRecord;
use crate::telemetry::ErrorKind;
use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub struct ReconcileStage;

#[async_trait]
impl Stage for ReconcileStage {
    fn name(&self) -> &'static str {
        "reconcile"
    }

    async fn process(&self, mut item: Item, ctx: &Context) -> Result<StageOutcome> {
        let identifier = item.identifier().unwrap_or_default().to_string();
        let market = item.meta.market.clone();

        for (version, data) in item.versions.iter_mut() {
            if data.skip {
                continue;
            }

            let sha = match (&data.file_sha256, data.file_success) {
                (Some(sha), Some(true)) => sha.clone(),
                // Nothing stored: no row, so the next crawl retries the
                // download instead of treating the version as done
                _ => continue,
            };

            let our_path = data
                .file_path
                .clone()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();

            let known_path = {
                let catalogue = ctx.catalogue.lock().unwrap();
                catalogue.path_by_sha(&sha)?
            };

            match known_path {
                Some(existing) if existing != our_path => {
                    // Same digest, different canonical location; keep the
                    // catalogued copy
                    tracing::warn!(
                        identifier,
                        version,
                        sha256 = %sha,
                        existing,
                        new = %our_path,
                        "digest already catalogued at a different path"
                    );
                    ctx.telemetry.error(
                        ErrorKind::DedupMismatch,
                        &format!("{} stored at {} and {}", sha, existing, our_path),
                    );
                    if let Some(path) = &data.file_path {
                        ctx.content.remove(path)?;
                    }
                    data.file_path = Some(PathBuf::from(&existing));

                    let catalogue = ctx.catalogue.lock().unwrap();
                    catalogue.insert_version(&identifier, version, &market, Some(&sha))?;
                }
                Some(_) => {
                    // Digest known at the same path; just the version row
                    let catalogue = ctx.catalogue.lock().unwrap();
                    catalogue.insert_version(&identifier, version, &market, Some(&sha))?;
                }
                None => {
                    let catalogue = ctx.catalogue.lock().unwrap();
                    catalogue.record_download(&DownloadRecord {
                        identifier: &identifier,
                        version,
                        market: &market,
                        sha256: &sha,
                        path: &our_path,
                        size: data.file_size.unwrap_or(0),
                        md5: data.file_md5.as_deref(),
                    })?;
                }
            }
        }

        Ok(StageOutcome::Keep(item))
    }
}
