use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use scrapeforge_core::Document;
use scrapeforge_worker::CrawlPageObserver;

use crate::registry::CrawlRegistry;

/// The narrow seam the worker pool calls into (`scrapeforge_worker::CrawlPageObserver`):
/// looks the crawl up by id and forwards to its controller, per Design Note 3.
/// Shared by every worker task; holds only a registry handle, never a
/// specific controller, so it can be constructed before any crawl exists.
pub struct RegistryObserver {
    registry: Arc<CrawlRegistry>,
}

impl RegistryObserver {
    pub fn new(registry: Arc<CrawlRegistry>) -> Self {
        Self { registry }
    }
}

impl CrawlPageObserver for RegistryObserver {
    fn on_page_result(&self, crawl_id: Uuid, depth: u32, doc: Document) {
        let Some(controller) = self.registry.get(crawl_id) else {
            warn!(%crawl_id, "page result for unknown or finished crawl, dropping");
            return;
        };
        let controller = controller.clone();
        tokio::spawn(async move {
            controller.on_page_complete(depth, doc).await;
        });
    }
}
