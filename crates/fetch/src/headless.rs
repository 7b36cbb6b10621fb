use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use scrapeforge_core::{CoreError, FailureKind, FetchOutcome, FetcherCapability, ScrapeOptions};

use crate::Fetcher;

/// The embedded headless-browser sub-interface (§6). Treated as an opaque
/// external collaborator — this crate only ever talks to it through this
/// trait, never reimplements a browser.
#[async_trait]
pub trait HeadlessBrowser: Send + Sync {
    async fn navigate(&self, url: &Url, opts: &ScrapeOptions) -> Result<(), CoreError>;
    async fn screenshot(&self) -> Result<Vec<u8>, CoreError>;
    async fn content(&self) -> Result<String, CoreError>;
    async fn final_url(&self) -> Url;
    async fn close(&self) -> Result<(), CoreError>;
}

/// A pool of browser instances; each is exclusively leased for one fetch and
/// reset between uses (§5 shared resources).
#[async_trait]
pub trait HeadlessBrowserPool: Send + Sync {
    async fn lease(&self) -> Result<Box<dyn HeadlessBrowser>, CoreError>;
}

pub struct HeadlessFetcher {
    pool: std::sync::Arc<dyn HeadlessBrowserPool>,
    navigation_timeout: Duration,
}

impl HeadlessFetcher {
    pub fn new(pool: std::sync::Arc<dyn HeadlessBrowserPool>, navigation_timeout: Duration) -> Self {
        Self { pool, navigation_timeout }
    }
}

#[async_trait]
impl Fetcher for HeadlessFetcher {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn capabilities(&self) -> FetcherCapability {
        FetcherCapability {
            executes_js: true,
            supports_screenshot: true,
            supports_proxy: false,
            supports_stealth: false,
            respects_wait_for: true,
        }
    }

    async fn fetch(
        &self,
        url: &Url,
        opts: &ScrapeOptions,
        budget: Duration,
    ) -> Result<FetchOutcome, (FailureKind, String)> {
        let start = Instant::now();
        debug!(url = %url, wait_for_ms = opts.wait_for_ms, "fetching via headless browser");

        let browser = self
            .pool
            .lease()
            .await
            .map_err(|e| (FailureKind::Transient, e.to_string()))?;

        // §4.A: wait for network idle or waitFor ms, whichever is later, capped
        // by the effective budget (navigation_timeout is the hard cap).
        let effective_budget = budget.min(self.navigation_timeout);
        let nav = tokio::time::timeout(effective_budget, browser.navigate(url, opts)).await;
        match nav {
            Err(_) => {
                let _ = browser.close().await;
                return Err((FailureKind::Transient, "navigation timed out".into()));
            }
            Ok(Err(e)) => {
                let _ = browser.close().await;
                return Err((FailureKind::Transient, e.to_string()));
            }
            Ok(Ok(())) => {}
        }

        let html = browser
            .content()
            .await
            .map_err(|e| (FailureKind::Transient, e.to_string()))?;
        let final_url = browser.final_url().await;

        let screenshot = if opts.formats.iter().any(|f| matches!(f, scrapeforge_core::Format::Screenshot)) {
            browser.screenshot().await.ok()
        } else {
            None
        };

        let _ = browser.close().await;

        Ok(FetchOutcome {
            final_url,
            status_code: 200,
            headers: HashMap::new(),
            body: html.into_bytes(),
            screenshot,
            timing_ms: start.elapsed().as_millis() as u64,
            fetcher_name: self.name(),
        })
    }
}
