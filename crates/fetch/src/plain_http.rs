use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use scrapeforge_core::{bot_detection, FailureKind, FetchOutcome, FetcherCapability, ScrapeOptions};

use crate::Fetcher;

/// Single GET via `reqwest`, follows redirects, no JS. Fast, cheap, the
/// first strategy tried unless the options demand dynamic rendering (§4.A).
pub struct PlainHttpFetcher {
    client: reqwest::Client,
    /// Built with `danger_accept_invalid_certs(true)`; only ever selected
    /// when the request's own `ScrapeOptions::skip_tls_verification` asks
    /// for it. `reqwest::Client` bakes TLS verification in at build time,
    /// so there's no per-request override on the default client.
    insecure_client: reqwest::Client,
    max_redirects: usize,
}

impl PlainHttpFetcher {
    pub fn new(user_agent: &str, max_redirects: usize, connect_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .cookie_store(true)
            .build()?;
        let insecure_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .cookie_store(true)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client, insecure_client, max_redirects })
    }
}

#[async_trait]
impl Fetcher for PlainHttpFetcher {
    fn name(&self) -> &'static str {
        "plain_http"
    }

    fn capabilities(&self) -> FetcherCapability {
        FetcherCapability::default()
    }

    async fn fetch(
        &self,
        url: &Url,
        opts: &ScrapeOptions,
        budget: Duration,
    ) -> Result<FetchOutcome, (FailureKind, String)> {
        let start = Instant::now();
        debug!(url = %url, max_redirects = self.max_redirects, "fetching via plain_http");

        let client = if opts.skip_tls_verification { &self.insecure_client } else { &self.client };
        let mut req = client.get(url.clone()).timeout(budget);
        for (k, v) in &opts.headers {
            req = req.header(k, v);
        }

        let resp = req.send().await.map_err(|e| classify_reqwest_error(&e))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().clone();
        let mut headers = HashMap::new();
        for (k, v) in resp.headers() {
            if let Ok(val) = v.to_str() {
                headers.insert(k.as_str().to_string(), val.to_string());
            }
        }

        if status == 404 || status == 410 {
            return Err((FailureKind::NotFound, format!("status {status}")));
        }
        if status == 403 || status == 429 {
            return Err((FailureKind::Blocked, format!("status {status}")));
        }
        if (500..600).contains(&status) {
            return Err((FailureKind::Transient, format!("status {status}")));
        }

        let content_type = headers
            .get("content-type")
            .cloned()
            .unwrap_or_default();
        let body = resp
            .bytes()
            .await
            .map_err(|e| (FailureKind::Transient, e.to_string()))?;

        if body.is_empty() {
            return Err((FailureKind::InvalidContent, "empty body".into()));
        }
        if !content_type.is_empty()
            && !content_type.contains("html")
            && !content_type.contains("text")
        {
            return Err((FailureKind::InvalidContent, format!("non-html content-type {content_type}")));
        }

        let body_text = String::from_utf8_lossy(&body);
        if bot_detection::is_bot_challenge(&body_text, body.len()) {
            warn!(url = %url, "plain_http response looks like a bot challenge");
            return Err((FailureKind::Blocked, "bot challenge page".into()));
        }

        Ok(FetchOutcome {
            final_url,
            status_code: status,
            headers,
            body: body.to_vec(),
            screenshot: None,
            timing_ms: start.elapsed().as_millis() as u64,
            fetcher_name: self.name(),
        })
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> (FailureKind, String) {
    if e.is_timeout() {
        (FailureKind::Transient, "timeout".into())
    } else if e.is_connect() {
        if is_dns_failure(e) {
            // §4.A: "Fatal (invalid URL, DNS, TLS when not skipped)". A
            // name that doesn't resolve will fail identically on every
            // fallback strategy, so §4.B rule 3 says stop immediately
            // rather than burn the fetch budget cycling through
            // Headless/StealthProxy/FireEngine against the same hostname.
            (FailureKind::Fatal, format!("dns resolution failed: {e}"))
        } else {
            (FailureKind::Transient, e.to_string())
        }
    } else if e.is_builder() || e.is_redirect() {
        (FailureKind::Fatal, e.to_string())
    } else {
        (FailureKind::Transient, e.to_string())
    }
}

/// Walks `e`'s source chain looking for a DNS lookup failure, as distinct
/// from a TCP-connect-refused or connect-timeout (both genuinely
/// `Transient`: the host exists, the attempt just didn't land). `reqwest`
/// wraps the underlying resolver error (hyper's `GaiResolver` today, a
/// plain `std::io::Error`) several layers deep, exposed only via
/// `Error::source()`, not a dedicated `is_dns()` predicate.
fn is_dns_failure(e: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                return true;
            }
            let msg = io_err.to_string().to_lowercase();
            if msg.contains("lookup") || msg.contains("resolve") || msg.contains("name or service not known") {
                return true;
            }
        }
        let msg = err.to_string().to_lowercase();
        if msg.contains("dns error") || msg.contains("failed to lookup address") {
            return true;
        }
        source = err.source();
    }
    false
}
