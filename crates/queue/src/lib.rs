pub mod memory;
pub mod postgres;

pub use memory::MemoryJobQueue;
pub use postgres::PostgresJobQueue;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use scrapeforge_core::{CoreError, Document, Job, ScrapeError};

/// Delivered to `subscribe`rs until a terminal event (§4.F, Design Note
/// "progress streaming" — an event channel per job id rather than shared
/// mutable state).
/// What happened to a job passed to `JobQueue::fail` (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Requeued,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub progress: Option<f64>,
    pub current_doc: Option<Document>,
    pub terminal: bool,
}

impl ProgressEvent {
    pub fn progress(value: f64) -> Self {
        Self { progress: Some(value), current_doc: None, terminal: false }
    }

    pub fn terminal(doc: Option<Document>) -> Self {
        Self { progress: Some(1.0), current_doc: doc, terminal: true }
    }
}

/// Durable job store with priorities, retries, and delays (§4.F). Both the
/// in-memory and Postgres-backed implementations satisfy the same contract
/// so the worker pool and crawl controller never depend on which one is
/// active — a handful of async methods callers never bypass.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Atomic; returns once the job is durably accepted.
    async fn enqueue(&self, job: Job) -> Result<(), CoreError>;

    /// Returns the highest-priority ready job (FIFO within a priority),
    /// assigning an exclusive lease to `worker_id`. `None` if nothing is
    /// ready.
    async fn lease(&self, worker_id: &str) -> Result<Option<Job>, CoreError>;

    /// Releases the lease, stores the result, marks the job completed.
    async fn complete(&self, id: Uuid, result: Document) -> Result<(), CoreError>;

    /// If `retryable` and `attempts < maxAttempts`, re-enqueues with
    /// exponential backoff (`base * 2^attempts`, jittered); otherwise marks
    /// the job failed permanently. The returned `FailOutcome` tells the
    /// caller which happened, since a crawl controller only cares about
    /// *permanent* per-page failures (§4.H step 5 only fires once).
    async fn fail(&self, id: Uuid, error: ScrapeError, retryable: bool) -> Result<FailOutcome, CoreError>;

    /// Best-effort: removes a queued job outright, or marks an active job
    /// for cancellation that the owning worker observes at its next
    /// checkpoint.
    async fn cancel(&self, id: Uuid) -> Result<(), CoreError>;

    /// Subscribe to progress events for one job id. Sends an initial
    /// snapshot of the job's current progress before returning (Design
    /// Note: "Subscribers receive a snapshot on subscribe and deltas
    /// thereafter"). Unsubscribing (dropping the receiver) closes the
    /// channel from the subscriber's side.
    async fn subscribe(&self, id: Uuid) -> broadcast::Receiver<ProgressEvent>;

    /// Publish a progress event to any current subscribers of `id`. A no-op
    /// if nobody is listening.
    async fn publish_progress(&self, id: Uuid, event: ProgressEvent);

    /// Whether `id` has been marked for cancellation (checked by workers
    /// between phases per §5).
    async fn is_cancelled(&self, id: Uuid) -> bool;
}

/// Retry backoff per §4.F / §7: `base * 2^attempts`, jittered by ±25%.
pub fn backoff_delay(base_seconds: u64, attempts: u32) -> std::time::Duration {
    use rand::Rng;
    let exp = attempts.min(10);
    let raw = base_seconds.saturating_mul(1u64 << exp);
    let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
    let jittered = (raw as f64) * (1.0 + jitter_frac);
    std::time::Duration::from_secs_f64(jittered.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_within_jitter_bounds() {
        for attempts in 0..5 {
            let d = backoff_delay(1, attempts);
            let expected = (1u64 << attempts) as f64;
            assert!(d.as_secs_f64() >= expected * 0.7);
            assert!(d.as_secs_f64() <= expected * 1.3);
        }
    }
}
