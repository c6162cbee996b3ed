//! Binary analysis and assetlinks verification stages

use crate::crawler::FetchOutcome;
use crate::model::{AnalysisReport, Callback, Item, Request};
use crate::pipeline::{Context, Stage, StageOutcome};
use crate::telemetry::ErrorKind;
use crate::web;
use crate::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

const ASSETLINKS_TIMEOUT: Duration = Duration::from_secs(5);

/// External binary analyzer capability
///
/// Wraps whatever tool inspects a stored binary: manifest decode, signing
/// certificates, declared app-link hosts. The pipeline runs without one
/// configured.
#[async_trait]
pub trait ApkAnalyzer: Send + Sync {
    async fn analyze(&self, path: &Path) -> Result<AnalysisReport>;
}

/// Runs the configured analyzer over each freshly downloaded binary
///
/// The manifest's package name backfills a missing on-market name; when the
/// two disagree the on-market name stands and the disagreement is logged.
pub struct AnalysisStage;

#[async_trait]
impl Stage for AnalysisStage {
    fn name(&self) -> &'static str {
        "analysis"
    }

    async fn process(&self, mut item: Item, ctx: &Context) -> Result<StageOutcome> {
        let analyzer = match &ctx.analyzer {
            Some(analyzer) => analyzer.clone(),
            None => return Ok(StageOutcome::Keep(item)),
        };
        let identifier = item.identifier().unwrap_or_default().to_string();

        let mut manifest_pkg: Option<String> = None;
        for (version, data) in item.versions.iter_mut() {
            if data.file_success != Some(true) {
                continue;
            }
            let path = match &data.file_path {
                Some(path) => path.clone(),
                None => continue,
            };

            match analyzer.analyze(&path).await {
                Ok(report) => {
                    if manifest_pkg.is_none() {
                        manifest_pkg = report.pkg_name.clone();
                    }
                    data.analysis = Some(report);
                }
                Err(e) => {
                    tracing::warn!(identifier, version, error = %e, "binary analysis failed");
                    ctx.telemetry.error(
                        ErrorKind::Analysis,
                        &format!("analysis of {} {} failed: {}", identifier, version, e),
                    );
                }
            }
        }

        if let Some(manifest_pkg) = manifest_pkg {
            match &item.meta.pkg_name {
                None => item.meta.pkg_name = Some(manifest_pkg),
                Some(market_pkg) if *market_pkg != manifest_pkg => {
                    tracing::warn!(
                        market_pkg,
                        manifest_pkg,
                        "package name disagrees with manifest; keeping the market's"
                    );
                }
                Some(_) => {}
            }
        }

        Ok(StageOutcome::Keep(item))
    }
}

/// Parses an `assetlinks.json` body into `{package -> [fingerprints]}`
///
/// Only `android_app` targets are kept; fingerprints are lowercased with
/// colons stripped so they compare against signing digests directly.
pub fn parse_assetlinks(body: &[u8]) -> Option<BTreeMap<String, Vec<String>>> {
    let statements: serde_json::Value = serde_json::from_slice(body).ok()?;
    let statements = statements.as_array()?;

    let mut packages: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for statement in statements {
        // "include" and web statements carry no target; skip them without
        // discarding the rest of the file
        let target = match statement.get("target") {
            Some(target) => target,
            None => continue,
        };
        if target.get("namespace").and_then(|n| n.as_str()) != Some("android_app") {
            continue;
        }
        let package = match target.get("package_name").and_then(|p| p.as_str()) {
            Some(package) => package.to_string(),
            None => continue,
        };
        let fingerprints: Vec<String> = target
            .get("sha256_cert_fingerprints")
            .and_then(|f| f.as_array())
            .map(|f| {
                f.iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_lowercase().replace(':', ""))
                    .collect()
            })
            .unwrap_or_default();
        packages.entry(package).or_default().extend(fingerprints);
    }
    Some(packages)
}

/// Verifies the app-link hosts each analysed binary declares
///
/// Fetches `/.well-known/assetlinks.json` once per unique registrable
/// domain across all versions, then attaches the per-domain result to each
/// version that declared it. A failed fetch or parse is recorded as `None`
/// for that domain, distinguishing "checked and absent" from "not checked".
pub struct AssetlinksStage;

#[async_trait]
impl Stage for AssetlinksStage {
    fn name(&self) -> &'static str {
        "assetlinks"
    }

    async fn process(&self, mut item: Item, ctx: &Context) -> Result<StageOutcome> {
        let mut domains: BTreeSet<String> = BTreeSet::new();
        for data in item.versions.values() {
            if let Some(analysis) = &data.analysis {
                for declared in &analysis.declared_domains {
                    domains.insert(web::strip_wildcard(declared).to_string());
                }
            }
        }
        if domains.is_empty() {
            return Ok(StageOutcome::Keep(item));
        }

        let mut results: BTreeMap<String, Option<BTreeMap<String, Vec<String>>>> = BTreeMap::new();
        for domain in &domains {
            let url = format!("https://{}/.well-known/assetlinks.json", domain);
            let request = Request::get(url, Callback::Artifact)
                .dont_filter()
                .with_timeout(ASSETLINKS_TIMEOUT);

            let result = match ctx.fetcher.fetch(request).await {
                FetchOutcome::Fetched(response) if response.is_success() => {
                    let bytes = response.body.bytes()?;
                    parse_assetlinks(&bytes)
                }
                _ => None,
            };
            if result.is_none() {
                tracing::debug!(domain, "assetlinks unavailable");
            }
            results.insert(domain.clone(), result);
        }

        for data in item.versions.values_mut() {
            if let Some(analysis) = &mut data.analysis {
                for declared in analysis.declared_domains.clone() {
                    let domain = web::strip_wildcard(&declared).to_string();
                    if let Some(result) = results.get(&domain) {
                        analysis.assetlink_domains.insert(domain, result.clone());
                    }
                }
            }
        }

        Ok(StageOutcome::Keep(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedAnalyzer(AnalysisReport);

    #[async_trait]
    impl ApkAnalyzer for FixedAnalyzer {
        async fn analyze(&self, _path: &Path) -> Result<AnalysisReport> {
            Ok(self.0.clone())
        }
    }

    fn analysed_item(report: AnalysisReport) -> Item {
        let mut item = testutil::item_with_version("1.0", None);
        let data = item.versions.get_mut("1.0").unwrap();
        data.file_success = Some(true);
        data.file_path = Some("/data/apks/abc.apk".into());
        data.analysis = Some(report);
        item
    }

    #[tokio::test]
    async fn test_analysis_attaches_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = testutil::context(dir.path());
        ctx.analyzer = Some(Arc::new(FixedAnalyzer(AnalysisReport {
            pkg_name: Some("com.x".to_string()),
            permissions: vec!["android.permission.INTERNET".to_string()],
            ..Default::default()
        })));

        let mut item = testutil::item_with_version("1.0", None);
        let data = item.versions.get_mut("1.0").unwrap();
        data.file_success = Some(true);
        data.file_path = Some("/data/apks/abc.apk".into());

        let item = match AnalysisStage.process(item, &ctx).await.unwrap() {
            StageOutcome::Keep(item) => item,
            StageOutcome::Drop => panic!("dropped"),
        };
        let analysis = item.versions["1.0"].analysis.as_ref().unwrap();
        assert_eq!(analysis.permissions.len(), 1);
    }

    #[tokio::test]
    async fn test_manifest_pkg_backfills_missing_market_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = testutil::context(dir.path());
        ctx.analyzer = Some(Arc::new(FixedAnalyzer(AnalysisReport {
            pkg_name: Some("com.from.manifest".to_string()),
            ..Default::default()
        })));

        let mut item = testutil::item_with_version("1.0", None);
        item.meta.pkg_name = None;
        item.meta.id = Some("42".to_string());
        let data = item.versions.get_mut("1.0").unwrap();
        data.file_success = Some(true);
        data.file_path = Some("/data/apks/abc.apk".into());

        let item = match AnalysisStage.process(item, &ctx).await.unwrap() {
            StageOutcome::Keep(item) => item,
            StageOutcome::Drop => panic!("dropped"),
        };
        assert_eq!(item.meta.pkg_name.as_deref(), Some("com.from.manifest"));
    }

    #[tokio::test]
    async fn test_market_name_wins_on_disagreement() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = testutil::context(dir.path());
        ctx.analyzer = Some(Arc::new(FixedAnalyzer(AnalysisReport {
            pkg_name: Some("com.other".to_string()),
            ..Default::default()
        })));

        let mut item = testutil::item_with_version("1.0", None);
        let data = item.versions.get_mut("1.0").unwrap();
        data.file_success = Some(true);
        data.file_path = Some("/data/apks/abc.apk".into());

        let item = match AnalysisStage.process(item, &ctx).await.unwrap() {
            StageOutcome::Keep(item) => item,
            StageOutcome::Drop => panic!("dropped"),
        };
        assert_eq!(item.meta.pkg_name.as_deref(), Some("com.x"));
    }

    #[test]
    fn test_parse_assetlinks_filters_and_normalises() {
        let body = br#"[
            {
                "relation": ["delegate_permission/common.handle_all_urls"],
                "target": {
                    "namespace": "android_app",
                    "package_name": "com.x",
                    "sha256_cert_fingerprints": ["AA:BB:CC"]
                }
            },
            {
                "relation": ["delegate_permission/common.handle_all_urls"],
                "target": {
                    "namespace": "web",
                    "site": "https://example.com"
                }
            }
        ]"#;

        let parsed = parse_assetlinks(body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["com.x"], vec!["aabbcc".to_string()]);
    }

    #[test]
    fn test_parse_assetlinks_skips_targetless_statements() {
        // An "include" statement has no target; the android_app entry after
        // it must still be kept
        let body = br#"[
            {"include": "https://example.com/more-statements.json"},
            {
                "relation": ["delegate_permission/common.handle_all_urls"],
                "target": {
                    "namespace": "android_app",
                    "package_name": "com.x",
                    "sha256_cert_fingerprints": ["AA:BB:CC"]
                }
            },
            {
                "target": {"namespace": "android_app"}
            }
        ]"#;

        let parsed = parse_assetlinks(body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["com.x"], vec!["aabbcc".to_string()]);
    }

    #[test]
    fn test_parse_assetlinks_rejects_garbage() {
        assert!(parse_assetlinks(b"not json").is_none());
        assert!(parse_assetlinks(b"{\"an\": \"object\"}").is_none());
    }

    #[tokio::test]
    async fn test_assetlinks_attached_per_declared_domain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/assetlinks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"target": {"namespace": "android_app", "package_name": "com.x",
                     "sha256_cert_fingerprints": ["AA:BB:CC"]}}]"#,
            ))
            .mount(&server)
            .await;

        // The mock serves plain http; point the declared domain at it
        let host = server.uri().trim_start_matches("http://").to_string();

        let dir = tempfile::tempdir().unwrap();
        let ctx = testutil::context(dir.path());
        let item = analysed_item(AnalysisReport {
            declared_domains: vec![host.clone()],
            ..Default::default()
        });

        // https against the plain-http mock fails, recorded as None
        let item = match AssetlinksStage.process(item, &ctx).await.unwrap() {
            StageOutcome::Keep(item) => item,
            StageOutcome::Drop => panic!("dropped"),
        };
        let analysis = item.versions["1.0"].analysis.as_ref().unwrap();
        assert_eq!(analysis.assetlink_domains.get(&host), Some(&None));
    }

    #[tokio::test]
    async fn test_wildcard_domains_are_stripped_and_merged() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = testutil::context(dir.path());
        let item = analysed_item(AnalysisReport {
            declared_domains: vec![
                "*.invalid.example".to_string(),
                "invalid.example".to_string(),
            ],
            ..Default::default()
        });

        let item = match AssetlinksStage.process(item, &ctx).await.unwrap() {
            StageOutcome::Keep(item) => item,
            StageOutcome::Drop => panic!("dropped"),
        };
        let analysis = item.versions["1.0"].analysis.as_ref().unwrap();
        // Both declarations collapse to one checked domain
        assert_eq!(analysis.assetlink_domains.len(), 1);
        assert!(analysis.assetlink_domains.contains_key("invalid.example"));
    }
}
