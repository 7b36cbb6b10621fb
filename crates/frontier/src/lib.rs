use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use scrapeforge_core::CanonicalUrl;

/// One entry waiting to be crawled: its canonical URL and the depth at
/// which it was discovered.
pub type FrontierEntry = (CanonicalUrl, u32);

/// Per-crawl FIFO queue with dedup-aware membership (§4.E). Owned
/// exclusively by one `CrawlController`'s `CrawlState` (§3 ownership);
/// never shared across crawls. A single BFS queue backed by an exact
/// `HashSet`, since one crawl's frontier needs precise dedup, not
/// cross-session approximate dedup across millions of URLs.
pub struct Frontier {
    queue: Mutex<VecDeque<FrontierEntry>>,
    member: Mutex<HashSet<CanonicalUrl>>,
    /// Per-host last-enqueue timestamp, kept for politeness pacing even
    /// though nothing in this crate currently reads it back out for
    /// throttling decisions.
    host_last_seen: DashMap<String, Instant>,
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

impl Frontier {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            member: Mutex::new(HashSet::new()),
            host_last_seen: DashMap::new(),
        }
    }

    /// Push a URL at the given depth. Returns `true` if it was newly
    /// admitted, `false` if it (or an equal canonical form) was already
    /// pushed — testable property 2 (§8): duplicate pushes are no-ops.
    pub async fn push(&self, url: CanonicalUrl, depth: u32) -> bool {
        let mut member = self.member.lock().await;
        if !member.insert(url.clone()) {
            return false;
        }
        drop(member);

        if let Some(host) = host_of(&url) {
            self.host_last_seen.insert(host, Instant::now());
        }

        let mut queue = self.queue.lock().await;
        queue.push_back((url, depth));
        true
    }

    /// Push many URLs at once, returning how many were newly admitted.
    pub async fn push_many(&self, urls: impl IntoIterator<Item = FrontierEntry>) -> usize {
        let mut added = 0;
        for (url, depth) in urls {
            if self.push(url, depth).await {
                added += 1;
            }
        }
        added
    }

    /// Pop the next URL in FIFO (BFS) order. `None` when the frontier is
    /// drained (§4.E).
    pub async fn pop(&self) -> Option<FrontierEntry> {
        let mut queue = self.queue.lock().await;
        let popped = queue.pop_front();
        if popped.is_some() {
            debug!(remaining = queue.len(), "popped frontier entry");
        }
        popped
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Whether a URL has already entered this frontier (pushed, whether or
    /// not it has since been popped) — used by the controller alongside
    /// `CrawlState::visited`/`enqueued` for the admissibility check (§4.D).
    pub async fn contains(&self, url: &CanonicalUrl) -> bool {
        self.member.lock().await.contains(url)
    }
}

fn host_of(url: &CanonicalUrl) -> Option<String> {
    url::Url::parse(url.as_str()).ok().and_then(|u| u.host_str().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cu(s: &str) -> CanonicalUrl {
        CanonicalUrl::from_canonical(s.to_string())
    }

    #[tokio::test]
    async fn pop_returns_none_when_empty() {
        let frontier = Frontier::new();
        assert_eq!(frontier.pop().await, None);
    }

    #[tokio::test]
    async fn duplicate_push_is_a_no_op() {
        let frontier = Frontier::new();
        assert!(frontier.push(cu("https://a.test/x"), 0).await);
        assert!(!frontier.push(cu("https://a.test/x"), 0).await);
        assert_eq!(frontier.len().await, 1);
    }

    #[tokio::test]
    async fn pops_in_fifo_order() {
        let frontier = Frontier::new();
        frontier.push(cu("https://a.test/1"), 0).await;
        frontier.push(cu("https://a.test/2"), 0).await;
        frontier.push(cu("https://a.test/3"), 0).await;

        assert_eq!(frontier.pop().await, Some((cu("https://a.test/1"), 0)));
        assert_eq!(frontier.pop().await, Some((cu("https://a.test/2"), 0)));
        assert_eq!(frontier.pop().await, Some((cu("https://a.test/3"), 0)));
        assert_eq!(frontier.pop().await, None);
    }

    #[tokio::test]
    async fn push_many_reports_only_newly_admitted_count() {
        let frontier = Frontier::new();
        frontier.push(cu("https://a.test/1"), 0).await;
        let added = frontier
            .push_many(vec![(cu("https://a.test/1"), 0), (cu("https://a.test/2"), 1)])
            .await;
        assert_eq!(added, 1);
    }
}
