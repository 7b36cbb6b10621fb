use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use scrapeforge_core::{FailureKind, FetchOutcome, FetcherCapability, ScrapeOptions};

pub mod fire_engine;
pub mod headless;
pub mod plain_http;
pub mod selector;
pub mod stealth_proxy;

pub use fire_engine::FireEngineFetcher;
pub use headless::{HeadlessBrowser, HeadlessBrowserPool, HeadlessFetcher};
pub use plain_http::PlainHttpFetcher;
pub use selector::{FetcherKind, FetcherSelector, SelectorFailure};
pub use stealth_proxy::StealthProxyFetcher;

/// A strategy that retrieves raw HTML for one URL (§4.A). Polymorphic over
/// `{fetch, capabilities}`, per Design Note 2 — a closed set of variants
/// dispatched through one interface rather than an open plugin system.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> FetcherCapability;

    /// `budget` is the remaining wall-clock time this attempt may use,
    /// computed by the selector from `options.timeout` (§4.B).
    async fn fetch(
        &self,
        url: &Url,
        opts: &ScrapeOptions,
        budget: Duration,
    ) -> Result<FetchOutcome, (FailureKind, String)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFetcher {
        name: &'static str,
        outcome: std::sync::Mutex<Option<Result<FetchOutcome, (FailureKind, String)>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        fn name(&self) -> &'static str {
            self.name
        }
        fn capabilities(&self) -> FetcherCapability {
            FetcherCapability::default()
        }
        async fn fetch(
            &self,
            _url: &Url,
            _opts: &ScrapeOptions,
            _budget: Duration,
        ) -> Result<FetchOutcome, (FailureKind, String)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.lock().unwrap().take().expect("stub called more than once")
        }
    }

    fn ok_outcome(name: &'static str) -> FetchOutcome {
        FetchOutcome {
            final_url: Url::parse("https://a.test/").unwrap(),
            status_code: 200,
            headers: Default::default(),
            body: b"<html></html>".to_vec(),
            screenshot: None,
            timing_ms: 1,
            fetcher_name: name,
        }
    }

    #[tokio::test]
    async fn falls_back_from_transient_to_next_strategy() {
        let plain = Arc::new(StubFetcher {
            name: "plain_http",
            outcome: std::sync::Mutex::new(Some(Err((FailureKind::Transient, "boom".into())))),
            calls: AtomicUsize::new(0),
        });
        let headless = Arc::new(StubFetcher {
            name: "headless",
            outcome: std::sync::Mutex::new(Some(Ok(ok_outcome("headless")))),
            calls: AtomicUsize::new(0),
        });

        let selector = FetcherSelector::new(plain.clone()).with_headless(headless.clone());
        let url = Url::parse("https://a.test/").unwrap();
        let opts = ScrapeOptions::default();

        let result = selector.run(&url, &opts).await.unwrap();
        assert_eq!(result.fetcher_name, "headless");
        assert_eq!(plain.calls.load(Ordering::SeqCst), 1);
        assert_eq!(headless.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_immediately_on_not_found() {
        let plain = Arc::new(StubFetcher {
            name: "plain_http",
            outcome: std::sync::Mutex::new(Some(Err((FailureKind::NotFound, "404".into())))),
            calls: AtomicUsize::new(0),
        });
        let headless = Arc::new(StubFetcher {
            name: "headless",
            outcome: std::sync::Mutex::new(Some(Ok(ok_outcome("headless")))),
            calls: AtomicUsize::new(0),
        });

        let selector = FetcherSelector::new(plain.clone()).with_headless(headless.clone());
        let url = Url::parse("https://a.test/").unwrap();
        let opts = ScrapeOptions::default();

        let err = selector.run(&url, &opts).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::NotFound);
        assert_eq!(headless.calls.load(Ordering::SeqCst), 0);
    }
}
