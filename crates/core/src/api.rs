//! Response shapes for the HTTP controller layer, which is out of scope
//! here (§1/§6) — kept as plain serializable structs so a future
//! controller crate has a stable contract without duplicating the logic
//! that produces them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CanonicalUrl, CrawlStatus, Document};
use crate::ScrapeError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub success: bool,
    pub document: Option<Document>,
    pub error: Option<ScrapeError>,
}

impl ScrapeResponse {
    pub fn ok(document: Document) -> Self {
        Self { success: true, document: Some(document), error: None }
    }

    pub fn err(error: ScrapeError) -> Self {
        Self { success: false, document: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlAcceptedResponse {
    pub crawl_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlStatusResponse {
    pub crawl_id: Uuid,
    pub status: CrawlStatus,
    pub progress: f64,
    pub completed: usize,
    pub failed: usize,
    pub total_discovered: usize,
    pub errors: HashMap<CanonicalUrl, ScrapeError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub crawl_id: Uuid,
    pub cancelled: bool,
}
