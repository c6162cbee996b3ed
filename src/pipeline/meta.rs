//! Metadata ingress and counter stages

use crate::model::Item;
use crate::pipeline::{Context, Stage, StageOutcome};
use crate::telemetry::ErrorKind;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;

/// Pipeline ingress: stamps timestamps and enforces structural validity
///
/// An item without a package name or market id cannot be stored or
/// catalogued; it is dropped here so later stages can rely on
/// `identifier()` being present.
pub struct UniversalMetaStage;

#[async_trait]
impl Stage for UniversalMetaStage {
    fn name(&self) -> &'static str {
        "universal_meta"
    }

    async fn process(&self, mut item: Item, ctx: &Context) -> Result<StageOutcome> {
        if !item.is_structurally_valid() {
            ctx.telemetry.error(
                ErrorKind::Parse,
                &format!("item without identifier from {}", item.meta.url),
            );
            return Ok(StageOutcome::Drop);
        }

        let now = Utc::now();
        if item.meta.timestamp.is_none() {
            item.meta.timestamp = Some(now);
        }
        for version in item.versions.values_mut() {
            if version.timestamp.is_none() {
                version.timestamp = Some(now);
            }
        }
        Ok(StageOutcome::Keep(item))
    }
}

/// Bumps per-market counters after the download stages
pub struct CountersStage;

#[async_trait]
impl Stage for CountersStage {
    fn name(&self) -> &'static str {
        "counters"
    }

    async fn process(&self, item: Item, ctx: &Context) -> Result<StageOutcome> {
        let market = &item.meta.market;
        ctx.telemetry.record_item(market);
        ctx.telemetry.record_versions(market, item.versions.len() as u64);
        for version in item.versions.values() {
            if version.file_success == Some(true) {
                if let Some(size) = version.file_size {
                    ctx.telemetry.record_apk(market, size);
                }
            }
        }
        Ok(StageOutcome::Keep(item))
    }
}
