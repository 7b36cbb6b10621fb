use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    pub fetch: FetchConfig,
    pub headless: HeadlessConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub crawl: CrawlDefaultsConfig,
    pub scrape: ScrapeDefaultsConfig,
}

/// Tunes the tokio multi-thread runtime: worker thread count, stack size,
/// and max blocking threads, exposed through config instead of hardcoded so
/// the concurrency profile can be set per deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub worker_threads: Option<usize>,
    #[serde(default = "default_thread_stack_size_mb")]
    pub thread_stack_size_mb: usize,
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_stack_size_mb: default_thread_stack_size_mb(),
            max_blocking_threads: default_max_blocking_threads(),
        }
    }
}

fn default_thread_stack_size_mb() -> usize {
    2
}
fn default_max_blocking_threads() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    pub data_dir: String,
    pub database_url: String,
    pub user_agent: String,
}

/// Configuration for the plain-HTTP and FireEngine fetcher strategies.
#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    pub max_redirects: usize,
    pub max_body_size_mb: usize,
    pub connect_timeout_seconds: u64,
    #[serde(default)]
    pub fire_engine_url: Option<String>,
}

/// Configuration for the headless/stealth-proxy fetcher strategies.
#[derive(Debug, Deserialize, Clone)]
pub struct HeadlessConfig {
    pub enabled: bool,
    pub pool_size: usize,
    pub navigation_timeout_seconds: u64,
    #[serde(default)]
    pub proxy_pool: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    pub lease_ttl_seconds: u64,
    pub retry_base_delay_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    pub global_concurrency: usize,
    pub per_tenant_concurrency: usize,
    pub per_crawl_concurrency: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlDefaultsConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_robots_ttl")]
    pub robots_cache_ttl_seconds: u64,
}

fn default_max_depth() -> u32 {
    10
}
fn default_limit() -> u32 {
    10_000
}
fn default_robots_ttl() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrapeDefaultsConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}
