use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::controller::CrawlController;

/// Process-wide map from crawl id to its controller (Design Note 3: "store
/// only the crawl id, look up the CrawlState in a process-wide registry"
/// rather than threading an `Arc<CrawlController>` through the worker pool,
/// which would otherwise need to depend on this crate).
#[derive(Default)]
pub struct CrawlRegistry {
    controllers: DashMap<Uuid, Arc<CrawlController>>,
}

impl CrawlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, controller: Arc<CrawlController>) {
        self.controllers.insert(controller.id(), controller);
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<CrawlController>> {
        self.controllers.get(&id).map(|r| r.clone())
    }

    /// Drops the controller from the registry once a crawl reaches a
    /// terminal status, so a long-running process doesn't accumulate one
    /// entry per crawl forever.
    pub fn remove(&self, id: Uuid) {
        self.controllers.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
