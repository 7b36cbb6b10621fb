use std::time::{Duration, Instant};

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use tracing::debug;
use url::Url;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const USER_AGENT: &str = "ScrapeforgeBot";

struct CachedRobots {
    body: Option<String>,
    fetched_at: Instant,
}

/// Async collaborator that retrieves `robots.txt` for an origin. Kept as a
/// trait here rather than pulling in `scrapeforge-fetch` directly, so this
/// crate's dependency graph stays a leaf (§4.D).
#[async_trait::async_trait]
pub trait RobotsFetcher: Send + Sync {
    async fn fetch_robots_txt(&self, origin_url: &Url) -> Option<String>;
}

/// Per-origin `robots.txt` cache with a 1 hour TTL (§4.D). A missing or
/// unfetchable `robots.txt` is treated as "allow everything", per the
/// standard's own fallback behavior.
pub struct RobotsCache {
    entries: DashMap<String, CachedRobots>,
}

impl Default for RobotsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotsCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub async fn is_allowed(&self, url: &Url, fetcher: &dyn RobotsFetcher) -> bool {
        let Some(origin) = origin_key(url) else {
            return true;
        };

        let needs_refresh = match self.entries.get(&origin) {
            Some(entry) => entry.fetched_at.elapsed() > CACHE_TTL,
            None => true,
        };

        if needs_refresh {
            let body = fetcher.fetch_robots_txt(url).await;
            debug!(origin = %origin, found = body.is_some(), "refreshed robots.txt cache entry");
            self.entries.insert(
                origin.clone(),
                CachedRobots {
                    body,
                    fetched_at: Instant::now(),
                },
            );
        }

        let Some(entry) = self.entries.get(&origin) else {
            return true;
        };
        let Some(body) = &entry.body else {
            return true;
        };

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(body, USER_AGENT, url.as_str())
    }
}

fn origin_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(format!("{}://{}:{}", url.scheme(), host, url.port_or_known_default().unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticFetcher(Option<&'static str>);

    #[async_trait::async_trait]
    impl RobotsFetcher for StaticFetcher {
        async fn fetch_robots_txt(&self, _origin_url: &Url) -> Option<String> {
            self.0.map(|s| s.to_string())
        }
    }

    #[tokio::test]
    async fn disallowed_path_is_rejected() {
        let cache = RobotsCache::new();
        let fetcher = StaticFetcher(Some("User-agent: *\nDisallow: /private/\n"));
        let url = Url::parse("https://example.test/private/data").unwrap();
        assert!(!cache.is_allowed(&url, &fetcher).await);
    }

    #[tokio::test]
    async fn missing_robots_txt_allows_everything() {
        let cache = RobotsCache::new();
        let fetcher = StaticFetcher(None);
        let url = Url::parse("https://example.test/anything").unwrap();
        assert!(cache.is_allowed(&url, &fetcher).await);
    }
}
