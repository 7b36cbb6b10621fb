use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use scrapeforge_core::{FailureKind, FetchOutcome, FetcherCapability, ScrapeOptions};

use crate::Fetcher;

/// External fetching service used for sites that defeat the in-process
/// strategies (§4.A). Called over HTTPS; treated as an opaque collaborator,
/// same shape as `PlainHttpFetcher` but against a configured base URL.
pub struct FireEngineFetcher {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct FireEngineRequest<'a> {
    url: &'a str,
    wait_for_ms: u32,
    mobile: bool,
    block_ads: bool,
}

#[derive(Deserialize)]
struct FireEngineResponse {
    final_url: String,
    status_code: u16,
    html: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl FireEngineFetcher {
    pub fn new(base_url: String, connect_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl Fetcher for FireEngineFetcher {
    fn name(&self) -> &'static str {
        "fire_engine"
    }

    fn capabilities(&self) -> FetcherCapability {
        FetcherCapability {
            executes_js: true,
            supports_screenshot: false,
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
        let start = Instant::now();
        debug!(url = %url, endpoint = %self.base_url, "fetching via fire_engine");

        let body = FireEngineRequest {
            url: url.as_str(),
            wait_for_ms: opts.wait_for_ms,
            mobile: opts.mobile,
            block_ads: opts.block_ads,
        };

        let resp = self
            .client
            .post(&self.base_url)
            .json(&body)
            .timeout(budget)
            .send()
            .await
            .map_err(|e| (FailureKind::Transient, e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err((FailureKind::NotFound, "fire engine returned 404".into()));
        }
        if !resp.status().is_success() {
            return Err((FailureKind::Transient, format!("fire engine status {}", resp.status())));
        }

        let parsed: FireEngineResponse = resp
            .json()
            .await
            .map_err(|e| (FailureKind::InvalidContent, e.to_string()))?;

        let final_url = Url::parse(&parsed.final_url).unwrap_or_else(|_| url.clone());

        Ok(FetchOutcome {
            final_url,
            status_code: parsed.status_code,
            headers: parsed.headers,
            body: parsed.html.into_bytes(),
            screenshot: None,
            timing_ms: start.elapsed().as_millis() as u64,
            fetcher_name: self.name(),
        })
    }
}
