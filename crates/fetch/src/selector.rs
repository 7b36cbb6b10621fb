use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use url::Url;

use scrapeforge_core::{FailureKind, FetchOutcome, ScrapeOptions};

use crate::Fetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    PlainHttp,
    Headless,
    StealthProxy,
    FireEngine,
}

#[derive(Debug, Clone)]
pub struct SelectorFailure {
    pub kind: FailureKind,
    pub message: String,
    pub last_fetcher: FetcherKind,
}

/// Orders strategies, invokes them with fallback, classifies failures
/// (§4.B). Holds at most one instance of each strategy; strategies that
/// aren't configured (e.g. no headless pool available) are simply absent
/// from the ordering.
pub struct FetcherSelector {
    plain_http: Arc<dyn Fetcher>,
    headless: Option<Arc<dyn Fetcher>>,
    stealth_proxy: Option<Arc<dyn Fetcher>>,
    fire_engine: Option<Arc<dyn Fetcher>>,
}

impl FetcherSelector {
    pub fn new(plain_http: Arc<dyn Fetcher>) -> Self {
        Self {
            plain_http,
            headless: None,
            stealth_proxy: None,
            fire_engine: None,
        }
    }

    pub fn with_headless(mut self, f: Arc<dyn Fetcher>) -> Self {
        self.headless = Some(f);
        self
    }

    pub fn with_stealth_proxy(mut self, f: Arc<dyn Fetcher>) -> Self {
        self.stealth_proxy = Some(f);
        self
    }

    pub fn with_fire_engine(mut self, f: Arc<dyn Fetcher>) -> Self {
        self.fire_engine = Some(f);
        self
    }

    /// Build the ordered strategy list for one URL fetch (§4.B rules 1-2).
    pub fn order_for(&self, opts: &ScrapeOptions) -> Vec<(FetcherKind, Arc<dyn Fetcher>)> {
        let mut order = Vec::new();
        let dynamic_first = opts.needs_dynamic_rendering();

        if dynamic_first {
            if let Some(h) = &self.stealth_proxy {
                if matches!(opts.proxy, scrapeforge_core::ProxyMode::Stealth) {
                    order.push((FetcherKind::StealthProxy, h.clone()));
                }
            }
            if let Some(h) = &self.headless {
                order.push((FetcherKind::Headless, h.clone()));
            }
            if let Some(h) = &self.fire_engine {
                order.push((FetcherKind::FireEngine, h.clone()));
            }
            order.push((FetcherKind::PlainHttp, self.plain_http.clone()));
        } else {
            order.push((FetcherKind::PlainHttp, self.plain_http.clone()));
            if let Some(h) = &self.headless {
                order.push((FetcherKind::Headless, h.clone()));
            }
            if let Some(h) = &self.stealth_proxy {
                order.push((FetcherKind::StealthProxy, h.clone()));
            }
            if let Some(h) = &self.fire_engine {
                order.push((FetcherKind::FireEngine, h.clone()));
            }
        }

        order
    }

    /// Run the ordered strategies against a total wall-clock budget equal to
    /// `options.timeout`. At least one strategy is always attempted; later
    /// fallbacks are skipped once the budget is exhausted (§4.B).
    pub async fn run(&self, url: &Url, opts: &ScrapeOptions) -> Result<FetchOutcome, SelectorFailure> {
        let order = self.order_for(opts);
        let deadline = Instant::now() + Duration::from_millis(opts.timeout_ms);
        let mut last_failure: Option<SelectorFailure> = None;

        for (attempt, (kind, fetcher)) in order.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if attempt > 0 && remaining.is_zero() {
                debug!(?kind, "budget exhausted, skipping remaining fallbacks");
                break;
            }
            let budget = if remaining.is_zero() {
                Duration::from_millis(1)
            } else {
                remaining
            };

            match fetcher.fetch(url, opts, budget).await {
                Ok(outcome) => return Ok(outcome),
                Err((raw_kind, message)) => {
                    let kind_norm = raw_kind.normalized();
                    warn!(fetcher = fetcher.name(), ?kind_norm, %message, "fetch attempt failed");
                    last_failure = Some(SelectorFailure {
                        kind: kind_norm,
                        message,
                        last_fetcher: *kind,
                    });
                    if !kind_norm.should_fallback() {
                        break;
                    }
                }
            }
        }

        Err(last_failure.unwrap_or(SelectorFailure {
            kind: FailureKind::Fatal,
            message: "no fetcher strategy configured".into(),
            last_fetcher: FetcherKind::PlainHttp,
        }))
    }
}
