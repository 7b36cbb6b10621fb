use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::ScrapeError;

/// A canonicalized absolute URL (§3). Construction always goes through
/// `canonicalize`, so every `CanonicalUrl` in the system is already in
/// normal form; nothing downstream re-derives it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    /// Wrap an already-canonical string. Only `urlfilter::canonicalize`
    /// should call this in production code; exposed for tests that need to
    /// construct fixtures without pulling in the urlfilter crate.
    pub fn from_canonical(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output format a scrape can be asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Format {
    Markdown,
    Html,
    RawHtml,
    Links,
    Screenshot,
    Extract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    None,
    Basic,
    Stealth,
}

impl Default for ProxyMode {
    fn default() -> Self {
        ProxyMode::None
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractOptions {
    pub schema: Option<serde_json::Value>,
    pub prompt: Option<String>,
    pub system_prompt: Option<String>,
}

/// Configuration for one URL fetch (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOptions {
    #[serde(default = "default_formats")]
    pub formats: Vec<Format>,
    #[serde(default = "default_true")]
    pub only_main_content: bool,
    #[serde(default)]
    pub include_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub wait_for_ms: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub mobile: bool,
    #[serde(default)]
    pub skip_tls_verification: bool,
    #[serde(default)]
    pub remove_base64_images: bool,
    #[serde(default)]
    pub block_ads: bool,
    #[serde(default)]
    pub proxy: ProxyMode,
    pub extract: Option<ExtractOptions>,
}

fn default_formats() -> Vec<Format> {
    vec![Format::Markdown]
}
fn default_true() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            only_main_content: true,
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            wait_for_ms: 0,
            timeout_ms: default_timeout_ms(),
            headers: HashMap::new(),
            mobile: false,
            skip_tls_verification: false,
            remove_base64_images: false,
            block_ads: false,
            proxy: ProxyMode::None,
            extract: None,
        }
    }
}

impl ScrapeOptions {
    pub fn needs_dynamic_rendering(&self) -> bool {
        self.formats.contains(&Format::Screenshot)
            || self.wait_for_ms > 0
            || !matches!(self.proxy, ProxyMode::None)
    }

    /// Pure validation per Design Note 1 — closed option set, no silent
    /// acceptance of nonsensical values.
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.timeout_ms == 0 {
            return Err(ScrapeError::BadRequest("timeout must be > 0".into()));
        }
        if self.formats.is_empty() {
            return Err(ScrapeError::BadRequest("formats must not be empty".into()));
        }
        Ok(())
    }
}

/// Configuration for a crawl (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlOptions {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default)]
    pub allow_backward_links: bool,
    #[serde(default)]
    pub allow_external_links: bool,
    #[serde(default)]
    pub ignore_sitemap: bool,
    #[serde(default)]
    pub scrape_options: ScrapeOptions,
}

fn default_max_depth() -> u32 {
    10
}
fn default_limit() -> u32 {
    10_000
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            limit: default_limit(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            allow_backward_links: false,
            allow_external_links: false,
            ignore_sitemap: false,
            scrape_options: ScrapeOptions::default(),
        }
    }
}

impl CrawlOptions {
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.limit == 0 {
            return Err(ScrapeError::BadRequest("limit must be > 0".into()));
        }
        self.scrape_options.validate()
    }
}

/// The result of processing one URL (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source_url: String,
    pub final_url: String,
    pub status_code: u16,
    pub fetched_at: DateTime<Utc>,
    pub raw_html: Option<String>,
    pub html: Option<String>,
    pub markdown: Option<String>,
    pub text: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub links: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub screenshot: Option<Vec<u8>>,
    pub extract: Option<serde_json::Value>,
    pub error: Option<ScrapeError>,
}

impl Document {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Invariant from §3: if `error` is present, `markdown`/`html` may be
    /// absent; otherwise `markdown` must be present.
    pub fn check_invariant(&self) -> bool {
        self.error.is_some() || self.markdown.is_some()
    }

    pub fn failed(source_url: String, error: ScrapeError) -> Self {
        Self {
            source_url: source_url.clone(),
            final_url: source_url,
            status_code: 0,
            fetched_at: Utc::now(),
            raw_html: None,
            html: None,
            markdown: None,
            text: None,
            title: None,
            description: None,
            language: None,
            links: Vec::new(),
            metadata: HashMap::new(),
            screenshot: None,
            extract: None,
            error: Some(error),
        }
    }
}

/// Per-strategy capability flags (§3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FetcherCapability {
    pub executes_js: bool,
    pub supports_screenshot: bool,
    pub supports_proxy: bool,
    pub supports_stealth: bool,
    pub respects_wait_for: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    Scrape,
    Crawl,
    CrawlPage,
}

impl JobKind {
    /// Default priority for this job kind (§3): lower is more urgent.
    pub fn default_priority(self) -> i32 {
        match self {
            JobKind::Scrape => 100,
            JobKind::Crawl => 50,
            JobKind::CrawlPage => 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub url: String,
    pub scrape_options: ScrapeOptions,
    pub tenant_id: String,
    pub parent_crawl_id: Option<Uuid>,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
}

/// Unit of work on the queue (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: JobPayload,
    pub priority: i32,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    pub progress: Option<f64>,
}

impl Job {
    pub fn new(kind: JobKind, payload: JobPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: kind.default_priority(),
            kind,
            payload,
            attempts: 0,
            created_at: Utc::now(),
            status: JobStatus::Created,
            progress: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    Active,
    Draining,
    Completed,
    Cancelled,
    Failed,
}

/// Per-crawl record (§3). Owned exclusively by the Crawl Controller that
/// created it; the frontier queue lives inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlState {
    pub id: Uuid,
    pub tenant_id: String,
    pub root: String,
    pub options: CrawlOptions,
    pub visited: HashSet<CanonicalUrl>,
    pub enqueued: HashSet<CanonicalUrl>,
    pub completed: HashSet<CanonicalUrl>,
    pub failed: HashMap<CanonicalUrl, ScrapeError>,
    #[serde(skip, default)]
    pub frontier_snapshot: VecDeque<(CanonicalUrl, u32)>,
    pub status: CrawlStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CrawlState {
    pub fn new(tenant_id: String, root: String, options: CrawlOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            root,
            options,
            visited: HashSet::new(),
            enqueued: HashSet::new(),
            completed: HashSet::new(),
            failed: HashMap::new(),
            frontier_snapshot: VecDeque::new(),
            status: CrawlStatus::Active,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Testable property 3 (§8): completed + failed <= limit.
    pub fn check_bound(&self) -> bool {
        self.completed.len() + self.failed.len() <= self.options.limit as usize
    }

    pub fn progress(&self) -> f64 {
        let denom = self.enqueued.len().max(self.options.limit as usize).max(1);
        (self.completed.len() + self.failed.len()) as f64 / denom as f64
    }
}

/// A single fetch result before pipeline transformation (§4.A).
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub final_url: Url,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub screenshot: Option<Vec<u8>>,
    pub timing_ms: u64,
    pub fetcher_name: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_invariant_requires_markdown_when_no_error() {
        let mut doc = Document::failed("https://a.test/".into(), ScrapeError::Internal("x".into()));
        assert!(doc.check_invariant());
        doc.error = None;
        assert!(!doc.check_invariant());
        doc.markdown = Some("# hi".into());
        assert!(doc.check_invariant());
    }

    #[test]
    fn crawl_state_bound_holds_initially() {
        let state = CrawlState::new("t1".into(), "https://a.test/".into(), CrawlOptions::default());
        assert!(state.check_bound());
    }

    #[test]
    fn job_kind_priorities_match_spec() {
        assert_eq!(JobKind::Scrape.default_priority(), 100);
        assert_eq!(JobKind::CrawlPage.default_priority(), 200);
    }
}
