use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use scrapeforge_content::{Extractor, MarkdownConverter, Pipeline};
use scrapeforge_core::{Document, Format, JobKind, JobPayload, ScrapeError};
use scrapeforge_fetch::selector::FetcherSelector;
use scrapeforge_queue::{FailOutcome, JobQueue};

use crate::limits::ConcurrencyLimits;
use crate::observer::CrawlPageObserver;

/// Everything a worker loop needs to execute a leased job (§4.G). Shared
/// read-only across every spawned worker task via `Arc`.
pub struct WorkerContext {
    pub queue: Arc<dyn JobQueue>,
    pub selector: Arc<FetcherSelector>,
    pub markdown_converter: Arc<dyn MarkdownConverter>,
    pub extractor: Arc<dyn Extractor>,
    pub limits: Arc<ConcurrencyLimits>,
    pub observer: Option<Arc<dyn CrawlPageObserver>>,
    /// How long an idle worker sleeps before re-polling an empty queue.
    pub idle_backoff: Duration,
}

/// Consumes jobs from the shared queue and bounds concurrency per tenant
/// and per crawl (§4.G): N fungible workers each looping
/// lease -> execute -> complete/fail against one shared queue, racing a
/// shutdown signal between phases.
pub struct WorkerPool;

impl WorkerPool {
    /// Spawn `n` worker tasks. Each runs until `shutdown` is triggered, at
    /// which point it finishes any job currently executing and exits — no
    /// new lease is taken once cancellation is observed.
    pub fn spawn(n: usize, ctx: Arc<WorkerContext>, shutdown: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        (0..n)
            .map(|i| {
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                let worker_id = format!("worker-{i}");
                tokio::spawn(async move { run_worker(worker_id, ctx, shutdown).await })
            })
            .collect()
    }
}

async fn run_worker(worker_id: String, ctx: Arc<WorkerContext>, shutdown: CancellationToken) {
    info!(worker_id, "worker started");
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let job = match ctx.queue.lease(&worker_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(ctx.idle_backoff) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }
            Err(e) => {
                warn!(worker_id, error = %e, "lease failed");
                tokio::time::sleep(ctx.idle_backoff).await;
                continue;
            }
        };

        let _permits = ctx.limits.acquire(&job.payload.tenant_id, job.payload.parent_crawl_id).await;
        execute_job(&ctx, &worker_id, job).await;
    }
    info!(worker_id, "worker shutting down");
}

async fn execute_job(ctx: &WorkerContext, worker_id: &str, job: scrapeforge_core::Job) {
    let job_id = job.id;

    // A `Crawl`-kind job's id equals its crawl id; it exists purely so
    // `queue.subscribe(crawl_id)` has a record to attach to before the
    // controller publishes anything (§4.H). It names no page to fetch and
    // the `CrawlController` alone publishes progress/terminal events on that
    // id — a worker must never fetch or complete it.
    if job.kind == JobKind::Crawl {
        debug!(worker_id, job_id = %job_id, "skipping bookkeeping-only crawl job");
        return;
    }

    let JobPayload { url, scrape_options, parent_crawl_id, depth, .. } = job.payload.clone();

    if ctx.queue.is_cancelled(job_id).await {
        finish_cancelled(ctx, job_id, &url, parent_crawl_id, depth).await;
        return;
    }

    let parsed_url = match Url::parse(&url) {
        Ok(u) => u,
        Err(e) => {
            let error = ScrapeError::BadRequest(format!("invalid URL {url}: {e}"));
            finish_failed(ctx, job_id, &url, parent_crawl_id, depth, error, false).await;
            return;
        }
    };

    debug!(worker_id, job_id = %job_id, %url, "fetch phase starting");
    let fetch_result = ctx.selector.run(&parsed_url, &scrape_options).await;

    if ctx.queue.is_cancelled(job_id).await {
        finish_cancelled(ctx, job_id, &url, parent_crawl_id, depth).await;
        return;
    }

    let outcome = match fetch_result {
        Ok(outcome) => outcome,
        Err(failure) => {
            let error = ScrapeError::from_failure_kind(failure.kind, failure.message);
            let retryable = error.is_retryable();
            finish_failed(ctx, job_id, &url, parent_crawl_id, depth, error, retryable).await;
            return;
        }
    };

    debug!(worker_id, job_id = %job_id, "transform phase starting");
    let raw_html = String::from_utf8_lossy(&outcome.body).into_owned();
    let pipeline = Pipeline::new(ctx.markdown_converter.as_ref(), ctx.extractor.as_ref());
    let output = pipeline.run(&raw_html, &scrape_options, &outcome.final_url);

    if ctx.queue.is_cancelled(job_id).await {
        finish_cancelled(ctx, job_id, &url, parent_crawl_id, depth).await;
        return;
    }

    // `ExtractFailed` is non-fatal (§7): the document still completes and
    // is queued as a success, just without an `extract` field; the error is
    // attached for visibility only.
    let doc = Document {
        source_url: url.clone(),
        final_url: outcome.final_url.to_string(),
        status_code: outcome.status_code,
        fetched_at: chrono::Utc::now(),
        raw_html: scrape_options.formats.contains(&Format::RawHtml).then(|| raw_html.clone()),
        html: scrape_options.formats.contains(&Format::Html).then(|| output.clean_html.clone()),
        markdown: Some(output.markdown),
        text: Some(output.text),
        title: output.title,
        description: output.description,
        language: output.language,
        links: output.links,
        metadata: output.metadata,
        screenshot: outcome.screenshot,
        extract: output.extract,
        error: output.extract_error.map(ScrapeError::ExtractFailed),
    };

    ctx.queue.complete(job_id, doc.clone()).await.ok();
    if let (Some(crawl_id), Some(observer)) = (parent_crawl_id, &ctx.observer) {
        observer.on_page_result(crawl_id, depth, doc);
    }
}

async fn finish_failed(
    ctx: &WorkerContext,
    job_id: uuid::Uuid,
    url: &str,
    parent_crawl_id: Option<uuid::Uuid>,
    depth: u32,
    error: ScrapeError,
    retryable: bool,
) {
    let outcome = ctx.queue.fail(job_id, error.clone(), retryable).await.unwrap_or(FailOutcome::Failed);
    if outcome == FailOutcome::Failed {
        if let (Some(crawl_id), Some(observer)) = (parent_crawl_id, &ctx.observer) {
            observer.on_page_result(crawl_id, depth, Document::failed(url.to_string(), error));
        }
    }
}

async fn finish_cancelled(
    ctx: &WorkerContext,
    job_id: uuid::Uuid,
    url: &str,
    parent_crawl_id: Option<uuid::Uuid>,
    depth: u32,
) {
    let error = ScrapeError::Internal("cancelled".into());
    ctx.queue.fail(job_id, error.clone(), false).await.ok();
    if let (Some(crawl_id), Some(observer)) = (parent_crawl_id, &ctx.observer) {
        observer.on_page_result(crawl_id, depth, Document::failed(url.to_string(), error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use scrapeforge_content::NullExtractor;
    use scrapeforge_core::{FailureKind, FetchOutcome, FetcherCapability, Job, JobKind, ScrapeOptions};
    use scrapeforge_fetch::Fetcher;
    use scrapeforge_queue::MemoryJobQueue;

    struct StubFetcher {
        html: &'static str,
    }

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
            Ok(FetchOutcome {
                final_url: url.clone(),
                status_code: 200,
                headers: Default::default(),
                body: self.html.as_bytes().to_vec(),
                screenshot: None,
                timing_ms: 1,
                fetcher_name: "stub",
            })
        }
    }

    struct RecordingObserver {
        results: Mutex<Vec<(uuid::Uuid, u32, Document)>>,
    }

    impl CrawlPageObserver for RecordingObserver {
        fn on_page_result(&self, crawl_id: uuid::Uuid, depth: u32, doc: Document) {
            self.results.lock().unwrap().push((crawl_id, depth, doc));
        }
    }

    fn test_ctx(html: &'static str, observer: Option<Arc<dyn CrawlPageObserver>>) -> Arc<WorkerContext> {
        let selector = Arc::new(FetcherSelector::new(Arc::new(StubFetcher { html })));
        Arc::new(WorkerContext {
            queue: Arc::new(MemoryJobQueue::default()),
            selector,
            markdown_converter: Arc::new(scrapeforge_content::HtmdConverter),
            extractor: Arc::new(NullExtractor),
            limits: Arc::new(ConcurrencyLimits::new(10, 10, 10)),
            observer,
            idle_backoff: Duration::from_millis(5),
        })
    }

    fn scrape_job(url: &str) -> Job {
        // Defaults per spec.md S1 ("with defaults"): only_main_content is
        // true out of the box, so leave it untouched rather than bypassing
        // the readability path the test below is meant to exercise.
        let scrape_options = ScrapeOptions::default();
        Job::new(
            JobKind::Scrape,
            JobPayload {
                url: url.to_string(),
                scrape_options,
                tenant_id: "t1".into(),
                parent_crawl_id: None,
                depth: 0,
            },
        )
    }

    #[tokio::test]
    async fn s1_scrape_job_completes_with_expected_markdown() {
        let ctx = test_ctx(
            "<html><head><title>Example</title></head><body><h1>Hi</h1><p>World</p></body></html>",
            None,
        );
        let job = scrape_job("https://example.com/");
        let job_id = job.id;
        ctx.queue.enqueue(job).await.unwrap();
        let mut rx = ctx.queue.subscribe(job_id).await;
        let _ = rx.recv().await.unwrap(); // initial snapshot sent by subscribe()
        let leased = ctx.queue.lease("w1").await.unwrap().unwrap();
        execute_job(&ctx, "w1", leased).await;

        let event = rx.recv().await.unwrap();
        assert!(event.terminal);
        let doc = event.current_doc.unwrap();
        assert_eq!(doc.markdown.as_deref().map(str::trim), Some("# Hi\n\nWorld"));
        assert_eq!(doc.title.as_deref(), Some("Example"));
    }

    #[tokio::test]
    async fn crawl_page_job_notifies_observer_on_completion() {
        let observer = Arc::new(RecordingObserver { results: Mutex::new(Vec::new()) });
        let ctx = test_ctx("<html><body><p>hi</p></body></html>", Some(observer.clone()));
        let crawl_id = uuid::Uuid::new_v4();
        let job = Job::new(
            JobKind::CrawlPage,
            JobPayload {
                url: "https://example.com/a".into(),
                scrape_options: ScrapeOptions::default(),
                tenant_id: "t1".into(),
                parent_crawl_id: Some(crawl_id),
                depth: 1,
            },
        );
        ctx.queue.enqueue(job).await.unwrap();
        let leased = ctx.queue.lease("w1").await.unwrap().unwrap();
        execute_job(&ctx, "w1", leased).await;

        let results = observer.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, crawl_id);
        assert_eq!(results[0].1, 1);
        assert!(results[0].2.error.is_none());
    }

    #[tokio::test]
    async fn cancelled_job_is_not_fetched_and_reports_failure_to_observer() {
        let observer = Arc::new(RecordingObserver { results: Mutex::new(Vec::new()) });
        let ctx = test_ctx("<html></html>", Some(observer.clone()));
        let crawl_id = uuid::Uuid::new_v4();
        let job = Job::new(
            JobKind::CrawlPage,
            JobPayload {
                url: "https://example.com/b".into(),
                scrape_options: ScrapeOptions::default(),
                tenant_id: "t1".into(),
                parent_crawl_id: Some(crawl_id),
                depth: 2,
            },
        );
        let job_id = job.id;
        ctx.queue.enqueue(job).await.unwrap();
        let leased = ctx.queue.lease("w1").await.unwrap().unwrap();
        ctx.queue.cancel(job_id).await.unwrap();
        execute_job(&ctx, "w1", leased).await;

        let results = observer.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].2.error.is_some());
        assert!(results[0].2.markdown.is_none());
    }
}

