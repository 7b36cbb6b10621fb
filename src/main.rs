mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;
use uuid::Uuid;

// mimalloc avoids glibc malloc's reluctance to release memory under the
// high-concurrency worker pool this binary spawns.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use scrapeforge_content::{HtmdConverter, NullExtractor, Pipeline};
use scrapeforge_core::{AppConfig, CrawlOptions, CrawlStatus, Format, ScrapeOptions};
use scrapeforge_crawl::{CrawlController, CrawlRegistry, RegistryObserver};
use scrapeforge_fetch::{Fetcher, FetcherSelector, FireEngineFetcher, PlainHttpFetcher};
use scrapeforge_queue::{JobQueue, MemoryJobQueue, PostgresJobQueue};
use scrapeforge_worker::{ConcurrencyLimits, WorkerContext, WorkerPool};

use crate::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        eprintln!("config file '{}' not found, using built-in defaults", cli.config);
        include_str!("../config/default.toml").to_string()
    });
    let config: AppConfig = toml::from_str(&config_str).context("parsing config")?;

    // Custom tokio runtime, config-driven rather than hardcoded, same
    // {worker_threads, thread_stack_size, max_blocking_threads} knobs this
    // binary has always exposed for high-concurrency fetch workloads.
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(n) = config.runtime.worker_threads {
        builder.worker_threads(n);
    }
    builder
        .thread_stack_size(config.runtime.thread_stack_size_mb * 1024 * 1024)
        .max_blocking_threads(config.runtime.max_blocking_threads)
        .enable_all();
    let runtime = builder.build()?;

    runtime.block_on(async_main(cli, config))
}

async fn async_main(cli: Cli, config: AppConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let fetch = build_fetch_stack(&config)?;

    match cli.command {
        Commands::Scrape { url, formats, keep_full_page, exclude_tags, timeout_ms } => {
            run_scrape(&fetch.selector, url, formats, keep_full_page, exclude_tags, timeout_ms).await
        }
        Commands::Crawl { url, max_depth, limit, allow_external_links, ignore_sitemap } => {
            run_crawl(&config, fetch, url, max_depth, limit, allow_external_links, ignore_sitemap).await
        }
        Commands::Status { crawl_id } => run_status(&config, crawl_id).await,
        Commands::Cancel { crawl_id } => run_cancel(&config, crawl_id).await,
    }
}

/// The fetcher strategies wired up for this process (§4.A/§4.B). `plain` is
/// kept separately from the ordered `selector` because the crawl controller
/// needs a single `Fetcher` for robots.txt/sitemap fetches, independent of
/// the per-page fallback order.
struct FetchStack {
    selector: Arc<FetcherSelector>,
    plain: Arc<dyn Fetcher>,
}

fn build_fetch_stack(config: &AppConfig) -> Result<FetchStack> {
    let plain: Arc<dyn Fetcher> = Arc::new(PlainHttpFetcher::new(
        &config.general.user_agent,
        config.fetch.max_redirects,
        Duration::from_secs(config.fetch.connect_timeout_seconds),
    )?);

    let mut selector = FetcherSelector::new(plain.clone());
    if let Some(base_url) = &config.fetch.fire_engine_url {
        let fire = FireEngineFetcher::new(
            base_url.clone(),
            Duration::from_secs(config.fetch.connect_timeout_seconds),
        )?;
        selector = selector.with_fire_engine(Arc::new(fire));
    }
    // `headless`/`stealth_proxy` strategies need a concrete
    // `HeadlessBrowserPool` (§6's opaque external collaborator); none is
    // wired up here since this binary never embeds a browser itself — see
    // DESIGN.md.

    Ok(FetchStack { selector: Arc::new(selector), plain })
}

async fn build_queue(config: &AppConfig) -> Result<Arc<dyn JobQueue>> {
    let lease_ttl = Duration::from_secs(config.queue.lease_ttl_seconds);
    let retry_base = Duration::from_secs(config.queue.retry_base_delay_seconds);

    if config.general.database_url.trim().is_empty() {
        info!("no database_url configured, using in-memory job queue");
        return Ok(Arc::new(
            MemoryJobQueue::new(lease_ttl, retry_base).with_max_attempts(config.queue.max_attempts),
        ));
    }

    let queue = PostgresJobQueue::new(&config.general.database_url, 10).await?;
    queue.run_migrations().await?;
    Ok(Arc::new(
        queue.with_timings(lease_ttl, retry_base).with_max_attempts(config.queue.max_attempts),
    ))
}

fn parse_format(s: &str) -> Option<Format> {
    match s.trim().to_lowercase().as_str() {
        "markdown" => Some(Format::Markdown),
        "html" => Some(Format::Html),
        "rawhtml" | "raw_html" => Some(Format::RawHtml),
        "links" => Some(Format::Links),
        "screenshot" => Some(Format::Screenshot),
        "extract" => Some(Format::Extract),
        _ => None,
    }
}

async fn run_scrape(
    selector: &FetcherSelector,
    url: String,
    formats: Option<Vec<String>>,
    keep_full_page: bool,
    exclude_tags: Option<Vec<String>>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let parsed = Url::parse(&url).with_context(|| format!("invalid URL: {url}"))?;

    let mut opts = ScrapeOptions::default();
    if let Some(requested) = formats {
        let parsed_formats: Vec<Format> = requested.iter().filter_map(|f| parse_format(f)).collect();
        if !parsed_formats.is_empty() {
            opts.formats = parsed_formats;
        }
    }
    opts.only_main_content = !keep_full_page;
    if let Some(tags) = exclude_tags {
        opts.exclude_tags = tags;
    }
    if let Some(ms) = timeout_ms {
        opts.timeout_ms = ms;
    }
    opts.validate()?;

    let outcome = selector
        .run(&parsed, &opts)
        .await
        .map_err(|f| anyhow::anyhow!("fetch failed ({:?} via {:?}): {}", f.kind, f.last_fetcher, f.message))?;

    let raw_html = String::from_utf8_lossy(&outcome.body).into_owned();
    let converter = HtmdConverter;
    let extractor = NullExtractor;
    let pipeline = Pipeline::new(&converter, &extractor);
    let output = pipeline.run(&raw_html, &opts, &outcome.final_url);

    if let Some(title) = &output.title {
        eprintln!("title: {title}");
    }
    println!("{}", output.markdown.trim());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_crawl(
    config: &AppConfig,
    fetch: FetchStack,
    url: String,
    max_depth: Option<u32>,
    limit: Option<u32>,
    allow_external_links: bool,
    ignore_sitemap: bool,
) -> Result<()> {
    let queue = build_queue(config).await?;

    let limits = Arc::new(ConcurrencyLimits::new(
        config.worker.global_concurrency,
        config.worker.per_tenant_concurrency,
        config.worker.per_crawl_concurrency,
    ));
    let registry = Arc::new(CrawlRegistry::new());
    let observer = Arc::new(RegistryObserver::new(registry.clone()));

    let ctx = Arc::new(WorkerContext {
        queue: queue.clone(),
        selector: fetch.selector,
        markdown_converter: Arc::new(HtmdConverter),
        extractor: Arc::new(NullExtractor),
        limits,
        observer: Some(observer),
        idle_backoff: Duration::from_millis(200),
    });

    let shutdown = CancellationToken::new();
    let handles = WorkerPool::spawn(config.worker.global_concurrency.max(1), ctx, shutdown.clone());

    let mut options = CrawlOptions::default();
    options.max_depth = max_depth.unwrap_or(config.crawl.max_depth);
    options.limit = limit.unwrap_or(config.crawl.limit);
    options.allow_external_links = allow_external_links;
    options.ignore_sitemap = ignore_sitemap;

    let controller = CrawlController::new("cli".into(), url.clone(), options, queue, fetch.plain)?;
    registry.register(controller.clone());
    let crawl_id = controller.id();
    println!("crawl {crawl_id} started for {url}");

    controller.start().await?;

    // `on_page_complete` runs on tasks spawned by `RegistryObserver`; poll
    // the controller's own state rather than the queue, since the terminal
    // condition is "no in-flight pages and an empty/limit-reached frontier",
    // not any single job's completion.
    loop {
        let snapshot = controller.snapshot().await;
        if matches!(
            snapshot.status,
            CrawlStatus::Completed | CrawlStatus::Cancelled | CrawlStatus::Failed
        ) {
            println!(
                "crawl {crawl_id} {:?}: {} completed, {} failed",
                snapshot.status,
                snapshot.completed.len(),
                snapshot.failed.len()
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    registry.remove(crawl_id);
    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn run_status(config: &AppConfig, crawl_id: String) -> Result<()> {
    let id = Uuid::parse_str(&crawl_id).context("invalid crawl id")?;
    let queue = build_queue(config).await?;

    let mut rx = queue.subscribe(id).await;
    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Ok(event)) => {
            println!("crawl {id}: progress={:?} terminal={}", event.progress, event.terminal);
        }
        _ => {
            // Status only exists for crawls the same queue backend has a
            // live record of; an in-memory queue's state doesn't survive
            // past the process that ran the crawl (see DESIGN.md).
            println!("crawl {id}: no status available");
        }
    }
    Ok(())
}

async fn run_cancel(config: &AppConfig, crawl_id: String) -> Result<()> {
    let id = Uuid::parse_str(&crawl_id).context("invalid crawl id")?;
    let queue = build_queue(config).await?;
    queue.cancel(id).await?;
    println!("cancel requested for crawl {id}");
    Ok(())
}
