//! Crawl orchestration
//!
//! The coordinator owns the scheduler and a pool of workers. Each worker
//! pops the next request, fetches it, hands the response to the adapter,
//! enqueues whatever the adapter discovered and runs completed items
//! through the pipeline. The crawl ends when the queue is empty and nothing
//! is in flight, when the item budget is spent, or when a shutdown is
//! requested.

use crate::adapter::SiteAdapter;
use crate::config::{CrawlerConfig, ResumationConfig};
use crate::crawler::backoff::Backoff;
use crate::crawler::fetcher::{FetchOutcome, Fetcher};
use crate::crawler::scheduler::Scheduler;
use crate::model::Request;
use crate::pipeline::PipelineRunner;
use crate::telemetry::ErrorKind;
use crate::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long an idle worker waits before re-checking the queue
const IDLE_POLL: Duration = Duration::from_millis(50);

pub struct Coordinator {
    adapter: Arc<dyn SiteAdapter>,
    fetcher: Arc<Fetcher>,
    pipeline: Arc<PipelineRunner>,
    scheduler: Mutex<Scheduler>,
    config: CrawlerConfig,
    resumation: ResumationConfig,
    backoff: Backoff,
    /// Requests fetched, parsed or waiting on a retry timer; the crawl is
    /// done only when this is zero and the queue is empty
    in_flight: AtomicUsize,
    items_processed: AtomicU64,
    shutdown: AtomicBool,
}

impl Coordinator {
    pub fn new(
        adapter: Arc<dyn SiteAdapter>,
        fetcher: Arc<Fetcher>,
        pipeline: Arc<PipelineRunner>,
        scheduler: Scheduler,
        config: CrawlerConfig,
        resumation: ResumationConfig,
    ) -> Self {
        Self {
            adapter,
            fetcher,
            pipeline,
            scheduler: Mutex::new(scheduler),
            config,
            resumation,
            backoff: Backoff::default(),
            in_flight: AtomicUsize::new(0),
            items_processed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Builds the scheduler for a run: resumed from the job directory when
    /// enabled and a snapshot exists, freshly seeded otherwise
    pub async fn seeded_scheduler(
        adapter: &dyn SiteAdapter,
        resumation: &ResumationConfig,
        fresh: bool,
    ) -> Result<Scheduler> {
        if resumation.enabled {
            let jobdir = PathBuf::from(&resumation.jobdir);
            if fresh {
                Scheduler::discard_snapshot(&jobdir)?;
            } else if let Some(scheduler) = Scheduler::resume(&jobdir)? {
                return Ok(scheduler);
            }
        }

        let mut scheduler = Scheduler::new();
        let seeds = adapter.seed_requests().await?;
        tracing::info!(market = adapter.name(), count = seeds.len(), "seeding crawl");
        for request in seeds {
            scheduler.enqueue(request);
        }
        Ok(scheduler)
    }

    /// Signals workers to stop after their current request
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn items_processed(&self) -> u64 {
        self.items_processed.load(Ordering::SeqCst)
    }

    /// Runs the crawl to completion
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let workers = self.config.concurrent_requests.max(1);
        tracing::info!(market = self.adapter.name(), workers, "starting crawl");

        let mut handles = Vec::with_capacity(workers as usize);
        for worker in 0..workers {
            let coordinator = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                coordinator.worker_loop(worker).await;
            }));
        }
        for handle in handles {
            // A panicking worker is a bug; surface it instead of hanging
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task failed");
            }
        }

        if self.resumation.enabled {
            let scheduler = self.scheduler.lock().unwrap();
            scheduler.persist(&PathBuf::from(&self.resumation.jobdir))?;
        }

        tracing::info!(
            market = self.adapter.name(),
            items = self.items_processed(),
            "crawl finished"
        );
        Ok(())
    }

    async fn worker_loop(self: &Arc<Self>, worker: u32) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if self.budget_spent() {
                self.shutdown();
                break;
            }

            // Claimed under the queue lock so an idle worker never sees an
            // empty queue with this request not yet counted in flight
            let request = {
                let mut scheduler = self.scheduler.lock().unwrap();
                let request = scheduler.next();
                if request.is_some() {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                }
                request
            };
            let request = match request {
                Some(request) => request,
                None => {
                    if self.in_flight.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                    tokio::time::sleep(IDLE_POLL).await;
                    continue;
                }
            };

            self.handle_request(request).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        tracing::debug!(worker, "worker finished");
    }

    fn budget_spent(&self) -> bool {
        self.config.item_count > 0
            && self.items_processed.load(Ordering::SeqCst) >= self.config.item_count
    }

    async fn handle_request(self: &Arc<Self>, request: Request) {
        let url = request.url.clone();
        let depth = request.depth;
        tracing::debug!(url, kind = request.callback.kind(), "dispatching");

        match self.fetcher.fetch(request).await {
            FetchOutcome::Fetched(response) => {
                let outcome = match self.adapter.parse(response).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(url, error = %e, "parse failed");
                        self.pipeline
                            .context()
                            .telemetry
                            .error(ErrorKind::Parse, &format!("{}: {}", url, e));
                        return;
                    }
                };

                {
                    let mut scheduler = self.scheduler.lock().unwrap();
                    for child in outcome.requests {
                        let child = child.with_depth(depth + 1);
                        if self.config.depth_limit > 0 && child.depth > self.config.depth_limit {
                            tracing::debug!(url = child.url, depth = child.depth, "depth limit");
                            continue;
                        }
                        scheduler.enqueue(child);
                    }
                }

                for item in outcome.items {
                    if self.budget_spent() {
                        break;
                    }
                    if self.pipeline.run(item).await.is_some() {
                        let processed = self.items_processed.fetch_add(1, Ordering::SeqCst) + 1;
                        self.maybe_snapshot(processed);
                    }
                }
            }
            FetchOutcome::Retriable {
                mut request,
                reason,
                retry_after,
            } => {
                if request.attempt >= self.config.retry_times {
                    tracing::warn!(url, reason, attempts = request.attempt, "giving up");
                    self.pipeline.context().telemetry.error(
                        ErrorKind::TransientNetwork,
                        &format!("{} failed after {} attempts: {}", url, request.attempt, reason),
                    );
                    return;
                }

                request.attempt += 1;
                let delay = retry_after.unwrap_or_else(|| self.backoff.delay(request.attempt));
                tracing::debug!(url, reason, attempt = request.attempt, ?delay, "retrying");

                // The timer holds an in-flight slot so the crawl cannot
                // conclude while a retry is pending
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                let coordinator = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    {
                        let mut scheduler = coordinator.scheduler.lock().unwrap();
                        scheduler.enqueue(request.dont_filter());
                    }
                    coordinator.in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
            FetchOutcome::Terminal { reason, .. } => {
                tracing::warn!(url, reason, "request failed permanently");
                self.pipeline
                    .context()
                    .telemetry
                    .error(ErrorKind::PermanentHttp, &format!("{}: {}", url, reason));
            }
        }
    }

    fn maybe_snapshot(&self, processed: u64) {
        if !self.resumation.enabled || self.resumation.snapshot_every == 0 {
            return;
        }
        if processed % self.resumation.snapshot_every != 0 {
            return;
        }
        let scheduler = self.scheduler.lock().unwrap();
        if let Err(e) = scheduler.persist(&PathBuf::from(&self.resumation.jobdir)) {
            tracing::warn!(error = %e, "periodic snapshot failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ParseOutcome, SiteAdapter};
    use crate::model::{Callback, Item, Response};
    use crate::pipeline::testutil;
    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Walks /page/N up to 3, emitting one item per page
    struct Paged {
        base: String,
    }

    #[async_trait]
    impl SiteAdapter for Paged {
        fn name(&self) -> &str {
            "paged"
        }

        async fn seed_requests(&self) -> Result<Vec<Request>> {
            Ok(vec![Request::get(
                format!("{}/page/1", self.base),
                Callback::List { page: 1 },
            )])
        }

        fn url_by_package(&self, _package: &str) -> Option<Request> {
            None
        }

        async fn parse_list(&self, response: &Response, page: u32) -> Result<ParseOutcome> {
            let mut outcome = ParseOutcome::none();
            if page < 3 {
                outcome.requests.push(Request::get(
                    format!("{}/page/{}", self.base, page + 1),
                    Callback::List { page: page + 1 },
                ));
            }
            let mut item = Item::new("paged", response.final_url.clone());
            item.meta.pkg_name = Some(format!("com.page.{}", page));
            outcome.items.push(item);
            Ok(outcome)
        }
    }

    fn coordinator(
        adapter: Arc<dyn SiteAdapter>,
        scheduler: Scheduler,
        config: CrawlerConfig,
        root: &std::path::Path,
    ) -> Arc<Coordinator> {
        let ctx = testutil::context(root);
        let fetcher = ctx.fetcher.clone();
        let pipeline = Arc::new(PipelineRunner::standard(ctx));
        Arc::new(Coordinator::new(
            adapter,
            fetcher,
            pipeline,
            scheduler,
            config,
            ResumationConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_crawl_follows_pagination_and_processes_items() {
        let server = MockServer::start().await;
        for page in 1..=3 {
            Mock::given(method("GET"))
                .and(path(format!("/page/{}", page)))
                .respond_with(ResponseTemplate::new(200).set_body_string("page"))
                .mount(&server)
                .await;
        }

        let adapter = Arc::new(Paged { base: server.uri() });
        let scheduler = Coordinator::seeded_scheduler(
            adapter.as_ref(),
            &ResumationConfig::default(),
            false,
        )
        .await
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = CrawlerConfig {
            concurrent_requests: 2,
            ..Default::default()
        };
        let coordinator = coordinator(adapter, scheduler, config, dir.path());
        coordinator.clone().run().await.unwrap();

        assert_eq!(coordinator.items_processed(), 3);
        // Each page's item reached the meta sink
        for page in 1..=3 {
            let meta = dir
                .path()
                .join("paged")
                .join(format!("com.page.{}", page))
                .join("meta.json");
            assert!(meta.exists(), "missing {:?}", meta);
        }
    }

    #[tokio::test]
    async fn test_item_budget_stops_the_crawl() {
        let server = MockServer::start().await;
        for page in 1..=3 {
            Mock::given(method("GET"))
                .and(path(format!("/page/{}", page)))
                .respond_with(ResponseTemplate::new(200).set_body_string("page"))
                .mount(&server)
                .await;
        }

        let adapter = Arc::new(Paged { base: server.uri() });
        let scheduler = Coordinator::seeded_scheduler(
            adapter.as_ref(),
            &ResumationConfig::default(),
            false,
        )
        .await
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = CrawlerConfig {
            concurrent_requests: 1,
            item_count: 1,
            ..Default::default()
        };
        let coordinator = coordinator(adapter, scheduler, config, dir.path());
        coordinator.clone().run().await.unwrap();

        assert_eq!(coordinator.items_processed(), 1);
    }

    #[tokio::test]
    async fn test_depth_limit_prunes_children() {
        let server = MockServer::start().await;
        for page in 1..=3 {
            Mock::given(method("GET"))
                .and(path(format!("/page/{}", page)))
                .respond_with(ResponseTemplate::new(200).set_body_string("page"))
                .mount(&server)
                .await;
        }

        let adapter = Arc::new(Paged { base: server.uri() });
        let scheduler = Coordinator::seeded_scheduler(
            adapter.as_ref(),
            &ResumationConfig::default(),
            false,
        )
        .await
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = CrawlerConfig {
            concurrent_requests: 1,
            depth_limit: 1,
            ..Default::default()
        };
        let coordinator = coordinator(adapter, scheduler, config, dir.path());
        coordinator.clone().run().await.unwrap();

        // Seed (depth 0) and its child (depth 1); the grandchild is pruned
        assert_eq!(coordinator.items_processed(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page/1"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("page"))
            .mount(&server)
            .await;
        for page in 2..=3 {
            Mock::given(method("GET"))
                .and(path(format!("/page/{}", page)))
                .respond_with(ResponseTemplate::new(200).set_body_string("page"))
                .mount(&server)
                .await;
        }

        let adapter = Arc::new(Paged { base: server.uri() });
        let scheduler = Coordinator::seeded_scheduler(
            adapter.as_ref(),
            &ResumationConfig::default(),
            false,
        )
        .await
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = CrawlerConfig {
            concurrent_requests: 1,
            ..Default::default()
        };
        let coordinator = coordinator(adapter, scheduler, config, dir.path());
        coordinator.clone().run().await.unwrap();

        assert_eq!(coordinator.items_processed(), 3);
    }
}
