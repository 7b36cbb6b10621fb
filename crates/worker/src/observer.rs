use uuid::Uuid;

use scrapeforge_core::Document;

/// Notified when a `crawlPage` job reaches a terminal state (completed or
/// permanently failed). Implemented by the crawl controller (Design Note 3:
/// a child job stores only its parent crawl id; the owner is looked up by
/// id rather than held by reference, avoiding a `worker -> crawl` dependency
/// cycle — this trait is the narrow seam the crawl crate plugs into).
pub trait CrawlPageObserver: Send + Sync {
    /// `doc.error` is `Some` when the page failed permanently; `doc.error`
    /// is `None` on success. Either way `doc.links` and `doc.source_url` are
    /// populated so the controller can run §4.H step 2-4 even on failure
    /// (a failed page still contributes nothing to the frontier, but the
    /// controller still needs the URL to record it in `failed`).
    fn on_page_result(&self, crawl_id: Uuid, depth: u32, doc: Document);
}
