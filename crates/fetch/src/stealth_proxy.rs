use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use scrapeforge_core::{FailureKind, FetchOutcome, FetcherCapability, ScrapeOptions};

use crate::headless::{HeadlessBrowserPool, HeadlessFetcher};
use crate::Fetcher;

/// Headless fetching routed through a residential proxy pool with anti-bot
/// fingerprint evasion, rotating across one browser pool per configured
/// proxy endpoint.
pub struct StealthProxyFetcher {
    pools: Vec<Arc<dyn HeadlessBrowserPool>>,
    counter: AtomicUsize,
    navigation_timeout: Duration,
}

impl StealthProxyFetcher {
    pub fn new(pools: Vec<Arc<dyn HeadlessBrowserPool>>, navigation_timeout: Duration) -> anyhow::Result<Self> {
        if pools.is_empty() {
            anyhow::bail!("stealth proxy fetcher requires at least one proxy-backed browser pool");
        }
        Ok(Self {
            pools,
            counter: AtomicUsize::new(0),
            navigation_timeout,
        })
    }

    fn next_pool(&self) -> Arc<dyn HeadlessBrowserPool> {
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % self.pools.len();
        self.pools[idx].clone()
    }
}

#[async_trait]
impl Fetcher for StealthProxyFetcher {
    fn name(&self) -> &'static str {
        "stealth_proxy"
    }

    fn capabilities(&self) -> FetcherCapability {
        FetcherCapability {
            executes_js: true,
            supports_screenshot: true,
            supports_proxy: true,
            supports_stealth: true,
            respects_wait_for: true,
        }
    }

    async fn fetch(
        &self,
        url: &Url,
        opts: &ScrapeOptions,
        budget: Duration,
    ) -> Result<FetchOutcome, (FailureKind, String)> {
        let pool = self.next_pool();
        let delegate = HeadlessFetcher::new(pool, self.navigation_timeout);
        let mut outcome = delegate.fetch(url, opts, budget).await?;
        outcome.fetcher_name = self.name();
        Ok(outcome)
    }
}
