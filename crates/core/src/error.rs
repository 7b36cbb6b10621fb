use thiserror::Error;

/// Classification of a single fetch attempt's failure (§4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    Transient,
    Blocked,
    NotFound,
    InvalidContent,
    Fatal,
}

impl FailureKind {
    /// Whether the fetcher selector should advance to the next strategy on
    /// this classification (§4.B rule 3). `InvalidContent` (e.g. a
    /// Cloudflare challenge page) is folded into `Blocked` behavior here.
    pub fn should_fallback(self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::Blocked | FailureKind::InvalidContent)
    }

    /// Normalize `InvalidContent` to `Blocked` for classification purposes
    /// per §4.B rule 3, while the selector's fallback decision already
    /// treats both the same way.
    pub fn normalized(self) -> Self {
        match self {
            FailureKind::InvalidContent => FailureKind::Blocked,
            other => other,
        }
    }
}

/// Error kinds surfaced to clients (§7), stable and safe to serialize.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum ScrapeError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited")]
    RateLimited,

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("fetch blocked: {0}")]
    FetchBlocked(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("transform failed: {0}")]
    TransformFailed(String),

    #[error("extract failed: {0}")]
    ExtractFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScrapeError {
    /// Max attempts for a job that failed with this error (§7: "default 3,
    /// 1 for TransformFailed"). `default_max_attempts` is the operator's
    /// configured `[queue] max_attempts` (`QueueConfig::max_attempts`);
    /// `TransformFailed` always gets exactly 1 regardless of that setting,
    /// per §7's explicit carve-out — a transform is deterministic (§8
    /// property 5), so retrying it against the same input can't succeed
    /// where the first attempt didn't.
    pub fn max_attempts(&self, default_max_attempts: u32) -> u32 {
        match self {
            ScrapeError::TransformFailed(_) => 1,
            _ => default_max_attempts,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ScrapeError::BadRequest(_)
                | ScrapeError::Unauthorized
                | ScrapeError::NotFound(_)
                | ScrapeError::Internal(_)
        )
    }

    pub fn from_failure_kind(kind: FailureKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            FailureKind::Transient => ScrapeError::FetchFailed(detail),
            FailureKind::Blocked => ScrapeError::FetchBlocked(detail),
            FailureKind::NotFound => ScrapeError::NotFound(detail),
            FailureKind::InvalidContent => ScrapeError::FetchBlocked(detail),
            FailureKind::Fatal => ScrapeError::FetchFailed(detail),
        }
    }
}

/// Internal plumbing error, converted to `ScrapeError` at job/API boundaries.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
