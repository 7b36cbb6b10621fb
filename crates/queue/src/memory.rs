use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::DashSet;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use scrapeforge_core::{CoreError, Document, Job, JobStatus, ScrapeError};

use crate::{backoff_delay, FailOutcome, JobQueue, ProgressEvent};

struct JobRecord {
    job: Job,
    not_before: Instant,
    leased_by: Option<String>,
    leased_until: Option<Instant>,
}

/// In-memory `JobQueue` (§4.F), used for tests and for running the pipeline
/// without Postgres. The `JobQueue` trait is the bypass-free seam: this
/// type is swappable for `PostgresJobQueue` without either caller (worker
/// pool, crawl controller) noticing.
pub struct MemoryJobQueue {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
    channels: DashMap<Uuid, broadcast::Sender<ProgressEvent>>,
    cancelled: DashSet<Uuid>,
    lease_ttl: Duration,
    retry_base: Duration,
    max_attempts: u32,
}

impl MemoryJobQueue {
    pub fn new(lease_ttl: Duration, retry_base: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            channels: DashMap::new(),
            cancelled: DashSet::new(),
            lease_ttl,
            retry_base,
            max_attempts: 3,
        }
    }

    /// Overrides the default-kind retry ceiling from `[queue] max_attempts`
    /// (`QueueConfig::max_attempts`); `TransformFailed` ignores this and
    /// always gets exactly 1 (§7).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn channel(&self, id: Uuid) -> broadcast::Sender<ProgressEvent> {
        self.channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(32).0)
            .clone()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(5))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, mut job: Job) -> Result<(), CoreError> {
        job.status = JobStatus::Queued;
        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(
            job.id,
            JobRecord { job, not_before: Instant::now(), leased_by: None, leased_until: None },
        );
        Ok(())
    }

    async fn lease(&self, worker_id: &str) -> Result<Option<Job>, CoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Instant::now();

        // Expire stale leases (worker crashed mid-job) so the job becomes
        // re-leasable, per §4.F.
        for record in jobs.values_mut() {
            if record.job.status == JobStatus::Active {
                if let Some(until) = record.leased_until {
                    if until < now {
                        record.job.status = JobStatus::Queued;
                        record.leased_by = None;
                        record.leased_until = None;
                    }
                }
            }
        }

        let candidate_id = jobs
            .values()
            .filter(|r| r.job.status == JobStatus::Queued && r.not_before <= now)
            .min_by(|a, b| {
                a.job
                    .priority
                    .cmp(&b.job.priority)
                    .then(a.job.created_at.cmp(&b.job.created_at))
            })
            .map(|r| r.job.id);

        let Some(id) = candidate_id else {
            return Ok(None);
        };

        let record = jobs.get_mut(&id).expect("candidate id came from this map");
        record.job.status = JobStatus::Active;
        record.leased_by = Some(worker_id.to_string());
        record.leased_until = Some(now + self.lease_ttl);
        debug!(job_id = %id, worker_id, "leased job");
        Ok(Some(record.job.clone()))
    }

    async fn complete(&self, id: Uuid, result: Document) -> Result<(), CoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(record) = jobs.get_mut(&id) {
            record.job.status = JobStatus::Completed;
            record.job.progress = Some(1.0);
            record.leased_by = None;
            record.leased_until = None;
        }
        drop(jobs);
        self.cancelled.remove(&id);
        self.channel(id).send(ProgressEvent::terminal(Some(result))).ok();
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: ScrapeError, retryable: bool) -> Result<FailOutcome, CoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(record) = jobs.get_mut(&id) else {
            return Ok(FailOutcome::Failed);
        };

        let max_attempts = error.max_attempts(self.max_attempts);
        let should_retry = retryable && record.job.attempts + 1 < max_attempts;

        if should_retry {
            record.job.attempts += 1;
            let delay = backoff_delay(self.retry_base.as_secs().max(1), record.job.attempts);
            record.job.status = JobStatus::Queued;
            record.not_before = Instant::now() + delay;
            record.leased_by = None;
            record.leased_until = None;
            debug!(job_id = %id, attempts = record.job.attempts, delay_secs = delay.as_secs(), "job failed, re-queued with backoff");
            drop(jobs);
            self.channel(id).send(ProgressEvent::progress(record_progress_placeholder())).ok();
            Ok(FailOutcome::Requeued)
        } else {
            record.job.status = JobStatus::Failed;
            record.leased_by = None;
            record.leased_until = None;
            let source_url = record.job.payload.url.clone();
            warn!(job_id = %id, %error, "job permanently failed");
            drop(jobs);
            self.cancelled.remove(&id);
            self.channel(id)
                .send(ProgressEvent::terminal(Some(Document::failed(source_url, error))))
                .ok();
            Ok(FailOutcome::Failed)
        }
    }

    async fn cancel(&self, id: Uuid) -> Result<(), CoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(record) if record.job.status == JobStatus::Queued => {
                record.job.status = JobStatus::Cancelled;
                drop(jobs);
                self.channel(id).send(ProgressEvent::terminal(None)).ok();
            }
            Some(record) if record.job.status == JobStatus::Active => {
                drop(jobs);
                self.cancelled.insert(id);
            }
            _ => {}
        }
        Ok(())
    }

    async fn subscribe(&self, id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let sender = self.channel(id);
        let receiver = sender.subscribe();
        if let Ok(jobs) = self.jobs.lock() {
            if let Some(record) = jobs.get(&id) {
                let _ = sender.send(ProgressEvent { progress: record.job.progress, current_doc: None, terminal: false });
            }
        }
        receiver
    }

    async fn publish_progress(&self, id: Uuid, event: ProgressEvent) {
        if let Ok(mut jobs) = self.jobs.lock() {
            if let Some(record) = jobs.get_mut(&id) {
                record.job.progress = event.progress;
            }
        }
        self.channel(id).send(event).ok();
    }

    async fn is_cancelled(&self, id: Uuid) -> bool {
        self.cancelled.contains(&id)
    }
}

/// Backoff re-queue events don't have a meaningful progress fraction yet;
/// emit `0.0` rather than `None` so subscribers can still distinguish "still
/// pending" from "no data received yet".
fn record_progress_placeholder() -> f64 {
    0.0
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<MemoryJobQueue>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeforge_core::{JobKind, JobPayload, ScrapeOptions};

    fn job() -> Job {
        Job::new(
            JobKind::Scrape,
            JobPayload {
                url: "https://a.test/".into(),
                scrape_options: ScrapeOptions::default(),
                tenant_id: "t1".into(),
                parent_crawl_id: None,
                depth: 0,
            },
        )
    }

    #[tokio::test]
    async fn lease_returns_highest_priority_first() {
        let q = MemoryJobQueue::default();
        let mut low = job();
        low.priority = 200;
        let mut high = job();
        high.priority = 50;
        q.enqueue(low).await.unwrap();
        q.enqueue(high.clone()).await.unwrap();

        let leased = q.lease("w1").await.unwrap().unwrap();
        assert_eq!(leased.id, high.id);
    }

    #[tokio::test]
    async fn lease_returns_none_when_empty() {
        let q = MemoryJobQueue::default();
        assert!(q.lease("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leased_job_is_not_leased_twice() {
        let q = MemoryJobQueue::default();
        q.enqueue(job()).await.unwrap();
        let first = q.lease("w1").await.unwrap();
        assert!(first.is_some());
        let second = q.lease("w2").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn fail_retries_with_backoff_until_max_attempts() {
        let q = MemoryJobQueue::new(Duration::from_secs(60), Duration::from_millis(1));
        let j = job();
        let id = j.id;
        q.enqueue(j).await.unwrap();
        let leased = q.lease("w1").await.unwrap().unwrap();
        assert_eq!(leased.attempts, 0);

        q.fail(id, ScrapeError::FetchFailed("boom".into()), true).await.unwrap();
        // not_before is in the future; immediate lease attempt should find nothing.
        let immediate = q.lease("w1").await.unwrap();
        assert!(immediate.is_none() || immediate.unwrap().id != id);
    }

    #[tokio::test]
    async fn fail_marks_permanently_failed_when_not_retryable() {
        let q = MemoryJobQueue::default();
        let j = job();
        let id = j.id;
        q.enqueue(j).await.unwrap();
        q.lease("w1").await.unwrap();
        q.fail(id, ScrapeError::NotFound("x".into()), false).await.unwrap();
        assert!(q.lease("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_active_job_is_observed_via_is_cancelled() {
        let q = MemoryJobQueue::default();
        let j = job();
        let id = j.id;
        q.enqueue(j).await.unwrap();
        q.lease("w1").await.unwrap();
        q.cancel(id).await.unwrap();
        assert!(q.is_cancelled(id).await);
    }

    #[tokio::test]
    async fn subscribe_then_complete_delivers_terminal_event() {
        let q = MemoryJobQueue::default();
        let j = job();
        let id = j.id;
        q.enqueue(j).await.unwrap();
        let mut rx = q.subscribe(id).await;
        let _ = rx.recv().await.unwrap(); // snapshot

        let leased = q.lease("w1").await.unwrap().unwrap();
        let doc = Document::failed(leased.payload.url.clone(), ScrapeError::Internal("x".into()));
        q.complete(id, doc).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert!(event.terminal);
    }
}
