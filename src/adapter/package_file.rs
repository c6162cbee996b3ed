//! Package-file and catalogue seeding
//!
//! Wraps any adapter and extends its seeds with detail requests for known
//! package identifiers, read from plain-text files (one identifier per line)
//! and optionally from packages previously observed in the catalogue. Seeded
//! requests run at a slightly lower priority than the adapter's own seeds so
//! a fresh listing walk is explored first.

use crate::adapter::{ParseOutcome, SiteAdapter};
use crate::model::{Item, Request, Response};
use crate::store::Catalogue;
use crate::Result;
use async_trait::async_trait;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const SEED_PRIORITY: i32 = -1;

pub struct PackageFileAdapter {
    inner: Arc<dyn SiteAdapter>,
    package_files: Vec<PathBuf>,
    catalogue: Option<Arc<Mutex<dyn Catalogue>>>,
}

impl PackageFileAdapter {
    pub fn new(inner: Arc<dyn SiteAdapter>, package_files: Vec<PathBuf>) -> Self {
        Self {
            inner,
            package_files,
            catalogue: None,
        }
    }

    /// Also seed from packages the catalogue has already observed on this
    /// market
    pub fn with_catalogue(mut self, catalogue: Arc<Mutex<dyn Catalogue>>) -> Self {
        self.catalogue = Some(catalogue);
        self
    }

    fn read_package_files(&self) -> Result<Vec<String>> {
        let mut packages = Vec::new();
        for path in &self.package_files {
            let file = std::fs::File::open(path)?;
            for line in std::io::BufReader::new(file).lines() {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                packages.push(trimmed.to_string());
            }
            tracing::info!(path = %path.display(), "seeded packages from file");
        }
        Ok(packages)
    }
}

#[async_trait]
impl SiteAdapter for PackageFileAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn seed_requests(&self) -> Result<Vec<Request>> {
        let mut seeds = self.inner.seed_requests().await?;

        let mut packages = self.read_package_files()?;
        if let Some(catalogue) = &self.catalogue {
            let observed = {
                let catalogue = catalogue.lock().unwrap();
                catalogue.observed_packages(self.name())?
            };
            tracing::info!(count = observed.len(), "seeded packages from catalogue");
            packages.extend(observed);
        }

        for package in packages {
            if let Some(request) = self.inner.url_by_package(&package) {
                seeds.push(request.with_priority(SEED_PRIORITY));
            }
        }
        Ok(seeds)
    }

    fn url_by_package(&self, package: &str) -> Option<Request> {
        self.inner.url_by_package(package)
    }

    async fn parse_list(&self, response: &Response, page: u32) -> Result<ParseOutcome> {
        self.inner.parse_list(response, page).await
    }

    async fn parse_version_list(&self, response: &Response, item: Item) -> Result<ParseOutcome> {
        self.inner.parse_version_list(response, item).await
    }

    async fn parse_detail(&self, response: &Response, item: Item) -> Result<ParseOutcome> {
        self.inner.parse_detail(response, item).await
    }

    async fn parse_download_page(
        &self,
        response: &Response,
        item: Item,
        version: String,
    ) -> Result<ParseOutcome> {
        self.inner.parse_download_page(response, item, version).await
    }

    async fn parse_similar(&self, response: &Response) -> Result<ParseOutcome> {
        self.inner.parse_similar(response).await
    }
}
