//! F-Droid-style repository adapter
//!
//! Repositories in this family publish a single JSON index describing every
//! package and version; binaries are plain files under the repo root. One
//! index fetch yields every item, so the adapter has no pagination and no
//! download-resolution chain.

use crate::adapter::{ParseOutcome, SiteAdapter};
use crate::model::{Callback, Item, Request, Response};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

pub struct FdroidAdapter {
    name: String,
    repo_url: String,
}

impl FdroidAdapter {
    /// `repo_url` is the repository root, e.g. `https://repo.example.org/repo`
    pub fn new(name: impl Into<String>, repo_url: impl Into<String>) -> Self {
        let mut repo_url = repo_url.into();
        while repo_url.ends_with('/') {
            repo_url.pop();
        }
        Self {
            name: name.into(),
            repo_url,
        }
    }

    fn index_url(&self) -> String {
        format!("{}/index-v2.json", self.repo_url)
    }
}

#[derive(Debug, Deserialize)]
struct Index {
    #[serde(default)]
    packages: BTreeMap<String, Package>,
}

#[derive(Debug, Deserialize)]
struct Package {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    versions: BTreeMap<String, Version>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    #[serde(default)]
    web_site: Option<String>,
    #[serde(default)]
    icon: BTreeMap<String, IndexFile>,
}

#[derive(Debug, Deserialize)]
struct Version {
    file: IndexFile,
    #[serde(default)]
    manifest: Manifest,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    version_name: Option<String>,
    #[serde(default)]
    version_code: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexFile {
    #[serde(default)]
    name: String,
}

#[async_trait]
impl SiteAdapter for FdroidAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn seed_requests(&self) -> Result<Vec<Request>> {
        Ok(vec![Request::get(
            self.index_url(),
            Callback::List { page: 1 },
        )])
    }

    /// The index is the only listing surface; package seeds resolve to it
    /// and the duplicate filter collapses them into one fetch
    fn url_by_package(&self, _package: &str) -> Option<Request> {
        Some(Request::get(self.index_url(), Callback::List { page: 1 }))
    }

    async fn parse_list(&self, response: &Response, _page: u32) -> Result<ParseOutcome> {
        let body = response.body.bytes()?;
        let index: Index =
            serde_json::from_slice(&body).map_err(|e| HarvestError::Parse {
                market: self.name.clone(),
                message: format!("bad repository index: {}", e),
            })?;

        tracing::info!(
            market = %self.name,
            packages = index.packages.len(),
            "parsed repository index"
        );

        let mut outcome = ParseOutcome::none();
        let mut items = Vec::new();
        for (pkg_name, package) in index.packages {
            let mut item = Item::new(self.name.clone(), self.index_url());
            item.meta.pkg_name = Some(pkg_name);
            item.meta.developer_website = package.metadata.web_site.clone();
            if let Some(icon) = package.metadata.icon.values().next() {
                if !icon.name.is_empty() {
                    item.meta.icon_url = Some(format!("{}{}", self.repo_url, icon.name));
                }
            }

            for version in package.versions.values() {
                let version_name = match &version.manifest.version_name {
                    Some(name) => name.clone(),
                    None => continue,
                };
                let data = item.versions.entry(version_name).or_default();
                data.download_url = Some(format!("{}{}", self.repo_url, version.file.name));
                data.code = version.manifest.version_code;
            }

            if !item.versions.is_empty() {
                items.push(item);
            }
        }

        outcome.items = items;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Body;

    const INDEX: &str = r#"{
        "packages": {
            "com.example.app": {
                "metadata": {
                    "webSite": "https://example.com",
                    "icon": {"en-US": {"name": "/icons/com.example.app.png"}}
                },
                "versions": {
                    "hash1": {
                        "file": {"name": "/com.example.app_2.apk"},
                        "manifest": {"versionName": "1.1", "versionCode": 2}
                    },
                    "hash2": {
                        "file": {"name": "/com.example.app_1.apk"},
                        "manifest": {"versionName": "1.0", "versionCode": 1}
                    }
                }
            },
            "org.other.tool": {
                "metadata": {},
                "versions": {
                    "hash3": {
                        "file": {"name": "/org.other.tool_5.apk"},
                        "manifest": {"versionName": "0.5", "versionCode": 5}
                    }
                }
            }
        }
    }"#;

    fn adapter() -> FdroidAdapter {
        FdroidAdapter::new("fdroid", "https://repo.example.org/repo/")
    }

    fn index_response(body: &str) -> Response {
        Response {
            status: 200,
            headers: Vec::new(),
            body: Body::Bytes(body.as_bytes().to_vec()),
            final_url: "https://repo.example.org/repo/index-v2.json".to_string(),
            request: Request::get(
                "https://repo.example.org/repo/index-v2.json",
                Callback::List { page: 1 },
            ),
        }
    }

    #[tokio::test]
    async fn test_index_yields_one_item_per_package() {
        let outcome = adapter()
            .parse_list(&index_response(INDEX), 1)
            .await
            .unwrap();

        assert_eq!(outcome.items.len(), 2);
        let app = &outcome.items[0];
        assert_eq!(app.meta.pkg_name.as_deref(), Some("com.example.app"));
        assert_eq!(app.meta.developer_website.as_deref(), Some("https://example.com"));
        assert_eq!(
            app.meta.icon_url.as_deref(),
            Some("https://repo.example.org/repo/icons/com.example.app.png")
        );
        assert_eq!(app.versions.len(), 2);
        assert_eq!(
            app.versions["1.1"].download_url.as_deref(),
            Some("https://repo.example.org/repo/com.example.app_2.apk")
        );
        assert_eq!(app.versions["1.1"].code, Some(2));
    }

    #[tokio::test]
    async fn test_bad_index_is_a_parse_error() {
        let result = adapter().parse_list(&index_response("nope"), 1).await;
        assert!(matches!(result, Err(HarvestError::Parse { .. })));
    }

    #[test]
    fn test_trailing_slash_is_normalised() {
        let adapter = FdroidAdapter::new("fdroid", "https://repo.example.org/repo///");
        assert_eq!(
            adapter.index_url(),
            "https://repo.example.org/repo/index-v2.json"
        );
    }
}
