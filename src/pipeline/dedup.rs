//! Catalogue dedup stages

use crate::model::Item;
use crate::pipeline::{Context, Stage, StageOutcome};
use crate::Result;
use async_trait::async_trait;

/// Appends a package sighting to the catalogue
///
/// Sightings are an append-only log, so observing the same package twice is
/// expected and kept.
pub struct PackageRecordStage;

#[async_trait]
impl Stage for PackageRecordStage {
    fn name(&self) -> &'static str {
        "package_record"
    }

    async fn process(&self, item: Item, ctx: &Context) -> Result<StageOutcome> {
        let identifier = item.identifier().unwrap_or_default().to_string();
        {
            let catalogue = ctx.catalogue.lock().unwrap();
            catalogue.insert_package(&identifier, &item.meta.market, &item.meta.url)?;
        }
        Ok(StageOutcome::Keep(item))
    }
}

/// Marks versions the catalogue already holds so the download stage skips
/// them
///
/// A skipped version keeps its recorded digest and the canonical file path,
/// so the meta file still points at the stored binary.
pub struct VersionDedupStage;

#[async_trait]
impl Stage for VersionDedupStage {
    fn name(&self) -> &'static str {
        "version_dedup"
    }

    async fn process(&self, mut item: Item, ctx: &Context) -> Result<StageOutcome> {
        let identifier = item.identifier().unwrap_or_default().to_string();
        let market = item.meta.market.clone();

        let catalogue = ctx.catalogue.lock().unwrap();
        for (version, data) in item.versions.iter_mut() {
            // Only a row with a stored digest counts as done; a digest-less
            // row must not suppress the download
            if let Some(Some(sha)) = catalogue.version_exists(&identifier, version, &market)? {
                data.skip = true;
                if let Some(path) = catalogue.path_by_sha(&sha)? {
                    data.file_path = Some(path.into());
                }
                data.file_sha256 = Some(sha);
                tracing::debug!(identifier, version, "version already catalogued");
            }
        }
        drop(catalogue);

        Ok(StageOutcome::Keep(item))
    }
}
