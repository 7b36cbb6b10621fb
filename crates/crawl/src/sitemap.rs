use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::{debug, warn};
use url::Url;

use scrapeforge_core::ScrapeOptions;
use scrapeforge_fetch::Fetcher;
use scrapeforge_urlfilter::RobotsFetcher;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Bridges `scrapeforge-fetch`'s `Fetcher` to the narrow `RobotsFetcher` seam
/// `scrapeforge-urlfilter` declares (that crate stays a dependency leaf, per
/// its own module docs), and separately fetches sitemaps with the same
/// underlying client, so robots.txt and sitemap retrieval share one
/// configured fetcher instead of each needing its own HTTP client.
pub struct FetcherHttpAdapter {
    fetcher: Arc<dyn Fetcher>,
}

impl FetcherHttpAdapter {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetches and parses one sitemap, returning the `<loc>` entries it
    /// lists. A sitemap index (`<sitemapindex>`) is not recursed into — its
    /// `<loc>` entries point at further sitemaps, not pages, and recursing
    /// arbitrarily deep is explicitly out of scope for seeding (§4.H only
    /// calls for seeding from "sitemap(s)", not a full sitemap-index crawl).
    pub async fn fetch_sitemap(&self, sitemap_url: &Url) -> Vec<Url> {
        let opts = ScrapeOptions::default();
        let outcome = match self.fetcher.fetch(sitemap_url, &opts, FETCH_TIMEOUT).await {
            Ok(outcome) => outcome,
            Err((kind, message)) => {
                debug!(?kind, %message, %sitemap_url, "sitemap fetch failed");
                return Vec::new();
            }
        };
        let body = String::from_utf8_lossy(&outcome.body);
        parse_sitemap_locs(&body)
            .into_iter()
            .filter_map(|loc| match Url::parse(&loc) {
                Ok(u) => Some(u),
                Err(e) => {
                    warn!(loc, error = %e, "sitemap listed an unparseable URL");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl RobotsFetcher for FetcherHttpAdapter {
    async fn fetch_robots_txt(&self, origin_url: &Url) -> Option<String> {
        let robots_url = origin_url.join("/robots.txt").ok()?;
        let opts = ScrapeOptions::default();
        let outcome = self.fetcher.fetch(&robots_url, &opts, FETCH_TIMEOUT).await.ok()?;
        Some(String::from_utf8_lossy(&outcome.body).into_owned())
    }
}

/// Walks `<urlset>/<url>/<loc>` (and tolerates a bare `<loc>` list) without
/// validating the rest of the sitemap schema — a new addition over the
/// teacher, which has no sitemap handling of its own; uses `quick-xml`
/// rather than hand-rolled string splitting.
fn parse_sitemap_locs(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"loc" => in_loc = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    locs.push(text.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "sitemap XML parse error, stopping early");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    locs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_loc_entries_from_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <url><loc>https://example.test/a</loc></url>
                <url><loc>https://example.test/b</loc></url>
            </urlset>"#;
        let locs = parse_sitemap_locs(xml);
        assert_eq!(locs, vec!["https://example.test/a", "https://example.test/b"]);
    }

    #[test]
    fn malformed_xml_yields_whatever_was_parsed_before_the_error() {
        let xml = r#"<urlset><url><loc>https://example.test/a</loc></url><url><loc>"#;
        let locs = parse_sitemap_locs(xml);
        assert_eq!(locs, vec!["https://example.test/a"]);
    }

    #[test]
    fn ignores_unrelated_tags() {
        let xml = r#"<urlset><url><loc>https://example.test/a</loc><lastmod>2024-01-01</lastmod></url></urlset>"#;
        let locs = parse_sitemap_locs(xml);
        assert_eq!(locs, vec!["https://example.test/a"]);
    }
}
