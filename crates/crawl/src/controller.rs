use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use scrapeforge_core::{
    CanonicalUrl, CrawlOptions, CrawlState, CrawlStatus, Document, Job, JobKind, JobPayload,
    JobStatus, ScrapeError,
};
use scrapeforge_fetch::Fetcher;
use scrapeforge_frontier::Frontier;
use scrapeforge_queue::{JobQueue, ProgressEvent};
use scrapeforge_urlfilter::{canonicalize, Admissibility, RobotsCache};

use crate::sitemap::FetcherHttpAdapter;

/// Drives one crawl's state machine end to end (§4.H). Holds the one
/// `CrawlState` and `Frontier` that belong to it exclusively (§3: "a
/// CrawlState is exclusively owned by its Crawl Controller instance; the
/// Frontier is internal to that state") — the controller is the single
/// writer; workers only ever reach it through `on_page_complete`.
pub struct CrawlController {
    id: Uuid,
    state: Mutex<CrawlState>,
    frontier: Frontier,
    root_host: String,
    /// Path component of the crawl's root URL. Anchors the `allowBackwardLinks`
    /// check (§4.D: "the URL's path is a prefix-extension of the **root's**
    /// path") — not the path of whichever page happened to link to it, so
    /// sibling sections discovered from different pages are judged against
    /// the same baseline.
    root_path: String,
    queue: Arc<dyn JobQueue>,
    robots: RobotsCache,
    http: FetcherHttpAdapter,
    in_flight: AtomicU32,
    /// Child job ids outstanding at the queue, kept so `cancel` can reach
    /// them individually (`CrawlPageObserver::on_page_result` carries no job
    /// id, see DESIGN.md). Entries are not removed on completion; `cancel`
    /// is only ever called once per crawl, so the minor staleness of
    /// already-finished ids in this set is harmless — `JobQueue::cancel` on
    /// a completed job id is a no-op in both implementations.
    active_job_ids: Mutex<HashSet<Uuid>>,
}

/// Bounds how many `crawlPage` jobs the controller keeps outstanding in the
/// queue at once, independent of the worker pool's own per-crawl semaphore
/// (§4.G); this just keeps one crawl from flooding the queue with its
/// entire frontier up front.
const MAX_OUTSTANDING: u32 = 50;

impl CrawlController {
    pub fn new(
        tenant_id: String,
        root: String,
        options: CrawlOptions,
        queue: Arc<dyn JobQueue>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Arc<Self>, ScrapeError> {
        options.validate()?;
        let root_url =
            Url::parse(&root).map_err(|e| ScrapeError::BadRequest(format!("invalid root URL: {e}")))?;
        let root_host = root_url
            .host_str()
            .ok_or_else(|| ScrapeError::BadRequest("root URL has no host".into()))?
            .to_string();
        let root_path = root_url.path().to_string();
        let state = CrawlState::new(tenant_id, root, options);
        Ok(Arc::new(Self {
            id: state.id,
            state: Mutex::new(state),
            frontier: Frontier::new(),
            root_host,
            root_path,
            queue,
            robots: RobotsCache::new(),
            http: FetcherHttpAdapter::new(fetcher),
            in_flight: AtomicU32::new(0),
            active_job_ids: Mutex::new(HashSet::new()),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// §4.H "On start": fetch robots.txt and (unless `ignoreSitemap`) the
    /// sitemap, seed the frontier with the root and admissible sitemap
    /// URLs, record a top-level `Crawl` job (its id equals the crawl id, so
    /// `queue.subscribe(crawl_id)` gives a stable status handle), then pump
    /// the first batch of `crawlPage` jobs.
    pub async fn start(self: &Arc<Self>) -> Result<(), ScrapeError> {
        let (root, options, tenant_id) = {
            let state = self.state.lock().await;
            (state.root.clone(), state.options.clone(), state.tenant_id.clone())
        };
        let root_url =
            Url::parse(&root).map_err(|e| ScrapeError::BadRequest(format!("invalid root URL: {e}")))?;

        self.queue
            .enqueue(Job {
                id: self.id,
                kind: JobKind::Crawl,
                payload: JobPayload {
                    url: root.clone(),
                    scrape_options: options.scrape_options.clone(),
                    tenant_id,
                    parent_crawl_id: None,
                    depth: 0,
                },
                priority: JobKind::Crawl.default_priority(),
                attempts: 0,
                created_at: Utc::now(),
                status: JobStatus::Active,
                progress: Some(0.0),
            })
            .await
            .map_err(|e| ScrapeError::Internal(e.to_string()))?;

        if !self.robots.is_allowed(&root_url, &self.http).await {
            warn!(crawl_id = %self.id, %root, "root URL disallowed by robots.txt");
            self.fail_crawl(ScrapeError::FetchBlocked("root disallowed by robots.txt".into())).await;
            return Ok(());
        }

        self.admit(canonicalize(&root_url), 0).await;

        if !options.ignore_sitemap {
            self.seed_from_sitemap(&root_url, &options).await;
        }

        self.pump().await;
        Ok(())
    }

    async fn seed_from_sitemap(&self, root_url: &Url, options: &CrawlOptions) {
        let Ok(sitemap_url) = root_url.join("/sitemap.xml") else {
            return;
        };
        let urls = self.http.fetch_sitemap(&sitemap_url).await;
        debug!(crawl_id = %self.id, found = urls.len(), "sitemap seeding");
        for url in urls {
            if !self.robots.is_allowed(&url, &self.http).await {
                continue;
            }
            let canonical = canonicalize(&url);
            let admissibility = Admissibility::new(&self.root_host, options);
            let admitted = {
                let state = self.state.lock().await;
                admissibility.check(&url, &canonical, 0, None, &state.enqueued).is_ok()
            };
            if admitted {
                self.admit(canonical, 0).await;
            }
        }
    }

    /// Marks `canonical` as admitted and pushes it onto the frontier.
    /// Callers are expected to have already run the admissibility check
    /// (or this is the root, which is always admitted).
    async fn admit(&self, canonical: CanonicalUrl, depth: u32) {
        let mut state = self.state.lock().await;
        state.enqueued.insert(canonical.clone());
        drop(state);
        self.frontier.push(canonical, depth).await;
    }

    /// Pops from the frontier and enqueues `crawlPage` jobs while page
    /// budget remains and the outstanding-job cap isn't reached (§4.H "On
    /// start" repeat-loop).
    async fn pump(self: &Arc<Self>) {
        loop {
            let status = self.state.lock().await.status;
            if status != CrawlStatus::Active {
                break;
            }
            if self.in_flight.load(Ordering::SeqCst) >= MAX_OUTSTANDING {
                break;
            }
            if self.at_limit().await {
                self.start_draining().await;
                break;
            }
            let Some((url, depth)) = self.frontier.pop().await else {
                break;
            };
            self.enqueue_page_job(url, depth).await;
        }
        self.maybe_finish().await;
    }

    async fn at_limit(&self) -> bool {
        let state = self.state.lock().await;
        (state.completed.len() + state.failed.len()) as u32 >= state.options.limit
    }

    async fn enqueue_page_job(&self, url: CanonicalUrl, depth: u32) {
        let (tenant_id, scrape_options) = {
            let state = self.state.lock().await;
            (state.tenant_id.clone(), state.options.scrape_options.clone())
        };
        let job = Job::new(
            JobKind::CrawlPage,
            JobPayload {
                url: url.as_str().to_string(),
                scrape_options,
                tenant_id,
                parent_crawl_id: Some(self.id),
                depth,
            },
        );
        let job_id = job.id;

        {
            let mut state = self.state.lock().await;
            state.visited.insert(url.clone());
        }
        self.active_job_ids.lock().await.insert(job_id);
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = self.queue.enqueue(job).await {
            warn!(crawl_id = %self.id, error = %e, "failed to enqueue crawl page job");
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.active_job_ids.lock().await.remove(&job_id);
        }
    }

    /// §4.H "When a crawlPage completes" steps 1-5.
    pub async fn on_page_complete(self: &Arc<Self>, depth: u32, doc: Document) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let source = CanonicalUrl::from_canonical(doc.source_url.clone());

        {
            let mut state = self.state.lock().await;
            match &doc.error {
                None => {
                    state.completed.insert(source.clone());
                }
                Some(err) => {
                    state.failed.insert(source.clone(), err.clone());
                }
            }
        }

        if doc.error.is_none() {
            self.discover_links(&doc, depth).await;
        }

        self.publish_progress().await;
        self.pump().await;
    }

    async fn discover_links(&self, doc: &Document, depth: u32) {
        let (root_host, options) = {
            let state = self.state.lock().await;
            if state.status != CrawlStatus::Active {
                return;
            }
            (self.root_host.clone(), state.options.clone())
        };
        let admissibility = Admissibility::new(&root_host, &options);

        for link in &doc.links {
            let Ok(link_url) = Url::parse(link) else { continue };
            let canonical = canonicalize(&link_url);

            let admitted = {
                let state = self.state.lock().await;
                admissibility
                    .check(&link_url, &canonical, depth + 1, Some(&self.root_path), &state.enqueued)
                    .is_ok()
            };
            if !admitted {
                continue;
            }
            if !self.robots.is_allowed(&link_url, &self.http).await {
                continue;
            }
            self.admit(canonical, depth + 1).await;
        }
    }

    async fn publish_progress(&self) {
        let state = self.state.lock().await;
        let denom = (state.enqueued.len() as f64).max(state.options.limit as f64).max(1.0);
        let progress = (state.completed.len() + state.failed.len()) as f64 / denom;
        drop(state);
        self.queue.publish_progress(self.id, ProgressEvent::progress(progress)).await;
    }

    async fn start_draining(&self) {
        let mut state = self.state.lock().await;
        if state.status == CrawlStatus::Active {
            state.status = CrawlStatus::Draining;
            info!(crawl_id = %self.id, "crawl draining: page limit reached");
        }
    }

    /// `active --frontier-empty--> draining --inflight=0--> completed`, or
    /// directly to `completed` when both conditions hold at once.
    async fn maybe_finish(&self) {
        if self.in_flight.load(Ordering::SeqCst) != 0 {
            return;
        }
        let frontier_empty = self.frontier.is_empty().await;
        let mut state = self.state.lock().await;
        let should_finish = match state.status {
            CrawlStatus::Active => frontier_empty,
            CrawlStatus::Draining => true,
            _ => false,
        };
        if !should_finish {
            return;
        }
        state.status = CrawlStatus::Completed;
        state.finished_at = Some(Utc::now());
        info!(crawl_id = %self.id, completed = state.completed.len(), failed = state.failed.len(), "crawl completed");
        drop(state);
        self.queue.publish_progress(self.id, ProgressEvent::terminal(None)).await;
    }

    /// §4.H `cancel` edge.
    pub async fn cancel(&self) {
        {
            let mut state = self.state.lock().await;
            if matches!(state.status, CrawlStatus::Completed | CrawlStatus::Cancelled | CrawlStatus::Failed) {
                return;
            }
            state.status = CrawlStatus::Cancelled;
            state.finished_at = Some(Utc::now());
        }
        let job_ids: Vec<Uuid> = self.active_job_ids.lock().await.iter().copied().collect();
        for job_id in job_ids {
            self.queue.cancel(job_id).await.ok();
        }
        self.queue.publish_progress(self.id, ProgressEvent::terminal(None)).await;
        info!(crawl_id = %self.id, "crawl cancelled");
    }

    /// §4.H `fatal-error` edge: a controller-level fault with no pages
    /// having succeeded yet (threshold decision recorded in DESIGN.md).
    async fn fail_crawl(&self, error: ScrapeError) {
        let mut state = self.state.lock().await;
        state.status = CrawlStatus::Failed;
        state.finished_at = Some(Utc::now());
        drop(state);
        self.queue.fail(self.id, error, false).await.ok();
    }

    pub async fn snapshot(&self) -> CrawlState {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scrapeforge_core::{FailureKind, FetchOutcome, FetcherCapability, ScrapeOptions};
    use scrapeforge_queue::MemoryJobQueue;
    use std::time::Duration;

    struct StubFetcher;

    #[async_trait]
    impl Fetcher for StubFetcher {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn capabilities(&self) -> FetcherCapability {
            FetcherCapability::default()
        }
        async fn fetch(
            &self,
            url: &Url,
            _opts: &ScrapeOptions,
            _budget: Duration,
        ) -> Result<FetchOutcome, (FailureKind, String)> {
            // robots.txt / sitemap.xml: behave as "not present" (404-like),
            // which both callers treat as "allow everything" / "no URLs".
            Err((FailureKind::NotFound, format!("no such resource: {url}")))
        }
    }

    fn new_controller(limit: u32) -> Arc<CrawlController> {
        let mut options = CrawlOptions::default();
        options.limit = limit;
        options.ignore_sitemap = true;
        CrawlController::new(
            "t1".into(),
            "https://example.test/".into(),
            options,
            Arc::new(MemoryJobQueue::default()),
            Arc::new(StubFetcher),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn start_seeds_root_and_enqueues_one_crawl_page_job() {
        let controller = new_controller(100);
        controller.start().await.unwrap();

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.status, CrawlStatus::Active);
        assert_eq!(snapshot.enqueued.len(), 1);
    }

    #[tokio::test]
    async fn on_page_complete_discovers_and_admits_new_links() {
        let controller = new_controller(100);
        controller.start().await.unwrap();

        let doc = Document {
            source_url: "https://example.test/".into(),
            final_url: "https://example.test/".into(),
            status_code: 200,
            fetched_at: Utc::now(),
            raw_html: None,
            html: None,
            markdown: Some("# hi".into()),
            text: Some("hi".into()),
            title: None,
            description: None,
            language: None,
            links: vec!["https://example.test/about".into()],
            metadata: Default::default(),
            screenshot: None,
            extract: None,
            error: None,
        };
        controller.on_page_complete(0, doc).await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.completed.len(), 1);
        assert_eq!(snapshot.enqueued.len(), 2);
    }

    #[tokio::test]
    async fn on_page_complete_records_failed_urls_without_failing_the_crawl() {
        let controller = new_controller(100);
        controller.start().await.unwrap();

        let doc = Document::failed("https://example.test/".into(), ScrapeError::FetchFailed("boom".into()));
        controller.on_page_complete(0, doc).await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.failed.len(), 1);
        assert_eq!(snapshot.status, CrawlStatus::Completed);
    }

    #[tokio::test]
    async fn crawl_completes_once_frontier_drains_and_nothing_in_flight() {
        let controller = new_controller(100);
        controller.start().await.unwrap();

        let doc = Document {
            source_url: "https://example.test/".into(),
            final_url: "https://example.test/".into(),
            status_code: 200,
            fetched_at: Utc::now(),
            raw_html: None,
            html: None,
            markdown: Some("# hi".into()),
            text: Some("hi".into()),
            title: None,
            description: None,
            language: None,
            links: vec![],
            metadata: Default::default(),
            screenshot: None,
            extract: None,
            error: None,
        };
        controller.on_page_complete(0, doc).await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.status, CrawlStatus::Completed);
        assert!(snapshot.finished_at.is_some());
    }

    #[tokio::test]
    async fn cancel_prevents_further_pumping() {
        let controller = new_controller(100);
        controller.start().await.unwrap();
        controller.cancel().await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.status, CrawlStatus::Cancelled);
    }

    #[tokio::test]
    async fn crawl_drains_once_limit_reached() {
        let controller = new_controller(1);
        controller.start().await.unwrap();

        let doc = Document {
            source_url: "https://example.test/".into(),
            final_url: "https://example.test/".into(),
            status_code: 200,
            fetched_at: Utc::now(),
            raw_html: None,
            html: None,
            markdown: Some("# hi".into()),
            text: Some("hi".into()),
            title: None,
            description: None,
            language: None,
            links: vec!["https://example.test/more".into()],
            metadata: Default::default(),
            screenshot: None,
            extract: None,
            error: None,
        };
        controller.on_page_complete(0, doc).await;

        let snapshot = controller.snapshot().await;
        // limit=1 already reached by this single completion; the
        // newly-discovered link is admitted into `enqueued`/frontier
        // bookkeeping but never pumped into a job.
        assert_eq!(snapshot.status, CrawlStatus::Completed);
        assert_eq!(snapshot.completed.len(), 1);
    }
}
