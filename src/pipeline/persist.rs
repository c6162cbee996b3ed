//! Meta file sink
//!
//! The last stage writes the fully processed item as `meta.json` in its
//! package directory. The file is the crawl's durable record of everything
//! the pipeline learned: versions, digests, document statuses, analysis.

use crate::model::Item;
use crate::pipeline::{Context, Stage, StageOutcome};
use crate::Result;
use async_trait::async_trait;

pub struct MetaPersistStage;

#[async_trait]
impl Stage for MetaPersistStage {
    fn name(&self) -> &'static str {
        "meta_persist"
    }

    async fn process(&self, item: Item, ctx: &Context) -> Result<StageOutcome> {
        let identifier = item.identifier().unwrap_or_default().to_string();
        let json = serde_json::to_vec_pretty(&item)?;
        ctx.content
            .write_artifact(&item.meta.market, &identifier, "meta.json", &json)?;
        tracing::debug!(identifier, market = %item.meta.market, "meta file written");
        Ok(StageOutcome::Keep(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil;

    #[tokio::test]
    async fn test_meta_file_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testutil::context(dir.path());
        let mut item = testutil::item_with_version("1.0", None);
        item.versions.get_mut("1.0").unwrap().file_sha256 = Some("abc".to_string());

        MetaPersistStage.process(item, &ctx).await.unwrap();

        let path = dir.path().join("testmarket").join("com.x").join("meta.json");
        let written: Item = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.meta.pkg_name.as_deref(), Some("com.x"));
        assert_eq!(written.versions["1.0"].file_sha256.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_meta_file_is_overwritten_on_revisit() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testutil::context(dir.path());

        let item = testutil::item_with_version("1.0", None);
        MetaPersistStage.process(item, &ctx).await.unwrap();

        let mut item = testutil::item_with_version("1.0", None);
        item.versions
            .insert("2.0".to_string(), Default::default());
        MetaPersistStage.process(item, &ctx).await.unwrap();

        let path = dir.path().join("testmarket").join("com.x").join("meta.json");
        let written: Item = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.versions.len(), 2);
    }
}
