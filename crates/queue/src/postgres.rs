use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scrapeforge_core::{CoreError, Document, Job, JobKind, JobPayload, JobStatus, ScrapeError};

use crate::{backoff_delay, FailOutcome, JobQueue, ProgressEvent};

/// Postgres-backed `JobQueue` (§4.F): `PgPoolOptions` connection setup,
/// `include_str!`-embedded migrations run on `new`, `sqlx::query_as`
/// throughout. Leases use `FOR UPDATE SKIP LOCKED` so concurrent workers
/// never contend for the same row; `subscribe` is backed by an in-process
/// `tokio::sync::broadcast` channel (Design Note: "prefer an event channel
/// per job id over shared mutable state") rather than `LISTEN`/`NOTIFY`,
/// since cross-process fanout of progress events is out of scope here.
///
/// Cancellation of an *active* job is persisted to the `cancel_requested`
/// column rather than kept in process-local state: the worker holding the
/// lease is very often a different process than the one that called
/// `cancel()`, and `is_cancelled` must be pollable from any of them (§4.F,
/// "mark for cancellation (workers poll)").
#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
    channels: DashMap<Uuid, broadcast::Sender<ProgressEvent>>,
    lease_ttl: Duration,
    retry_base: Duration,
    max_attempts: u32,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    payload: serde_json::Value,
    priority: i32,
    attempts: i32,
    created_at: DateTime<Utc>,
    status: String,
    progress: Option<f64>,
}

impl JobRow {
    fn into_job(self) -> Result<Job, CoreError> {
        let kind = match self.kind.as_str() {
            "scrape" => JobKind::Scrape,
            "crawl" => JobKind::Crawl,
            "crawlPage" => JobKind::CrawlPage,
            other => return Err(CoreError::Parse(format!("unknown job kind {other}"))),
        };
        let payload: JobPayload = serde_json::from_value(self.payload)
            .map_err(|e| CoreError::Parse(e.to_string()))?;
        let status = match self.status.as_str() {
            "created" => JobStatus::Created,
            "queued" => JobStatus::Queued,
            "active" => JobStatus::Active,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            other => return Err(CoreError::Parse(format!("unknown job status {other}"))),
        };
        Ok(Job {
            id: self.id,
            kind,
            payload,
            priority: self.priority,
            attempts: self.attempts as u32,
            created_at: self.created_at,
            status,
            progress: self.progress,
        })
    }
}

fn kind_str(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Scrape => "scrape",
        JobKind::Crawl => "crawl",
        JobKind::CrawlPage => "crawlPage",
    }
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Created => "created",
        JobStatus::Queued => "queued",
        JobStatus::Active => "active",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

impl PostgresJobQueue {
    pub async fn new(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "connected to postgres job queue");
        Ok(Self {
            pool,
            channels: DashMap::new(),
            lease_ttl: Duration::from_secs(60),
            retry_base: Duration::from_secs(5),
            max_attempts: 3,
        })
    }

    pub fn with_timings(mut self, lease_ttl: Duration, retry_base: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self.retry_base = retry_base;
        self
    }

    /// Overrides the default-kind retry ceiling from `[queue] max_attempts`
    /// (`QueueConfig::max_attempts`); `TransformFailed` ignores this and
    /// always gets exactly 1 (§7).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        info!("job queue migrations complete");
        Ok(())
    }

    fn channel(&self, id: Uuid) -> broadcast::Sender<ProgressEvent> {
        self.channels.entry(id).or_insert_with(|| broadcast::channel(32).0).clone()
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), CoreError> {
        let payload = serde_json::to_value(&job.payload).map_err(|e| CoreError::Parse(e.to_string()))?;
        sqlx::query(
            r#"INSERT INTO jobs (id, kind, payload, priority, attempts, created_at, status, progress, not_before)
               VALUES ($1, $2, $3, $4, $5, $6, 'queued', NULL, now())
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(job.id)
        .bind(kind_str(job.kind))
        .bind(payload)
        .bind(job.priority)
        .bind(job.attempts as i32)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Queue(e.to_string()))?;
        Ok(())
    }

    async fn lease(&self, worker_id: &str) -> Result<Option<Job>, CoreError> {
        let leased_until = Utc::now() + chrono::Duration::from_std(self.lease_ttl).unwrap_or(chrono::Duration::seconds(60));

        let row = sqlx::query_as::<_, JobRow>(
            r#"UPDATE jobs
               SET status = 'active', leased_by = $1, leased_until = $2
               WHERE id = (
                   SELECT id FROM jobs
                   WHERE (status = 'queued' OR (status = 'active' AND leased_until < now()))
                     AND not_before <= now()
                   ORDER BY priority ASC, created_at ASC
                   FOR UPDATE SKIP LOCKED
                   LIMIT 1
               )
               RETURNING id, kind, payload, priority, attempts, created_at, status, progress"#,
        )
        .bind(worker_id)
        .bind(leased_until)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Queue(e.to_string()))?;

        match row {
            Some(row) => {
                let job = row.into_job()?;
                debug!(job_id = %job.id, worker_id, "leased job from postgres");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, id: Uuid, result: Document) -> Result<(), CoreError> {
        let result_json = serde_json::to_value(&result).map_err(|e| CoreError::Parse(e.to_string()))?;
        sqlx::query(
            "UPDATE jobs SET status = 'completed', progress = 1.0, result = $2, leased_by = NULL, leased_until = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(result_json)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Queue(e.to_string()))?;

        self.channel(id).send(ProgressEvent::terminal(Some(result))).ok();
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: ScrapeError, retryable: bool) -> Result<FailOutcome, CoreError> {
        let row: Option<(i32, String)> = sqlx::query_as("SELECT attempts, payload->>'url' FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;
        let Some((attempts, source_url)) = row else {
            return Ok(FailOutcome::Failed);
        };

        let max_attempts = error.max_attempts(self.max_attempts) as i32;
        let should_retry = retryable && attempts + 1 < max_attempts;

        if should_retry {
            let delay = backoff_delay(self.retry_base.as_secs().max(1), (attempts + 1) as u32);
            let not_before = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(5));
            sqlx::query(
                "UPDATE jobs SET status = 'queued', attempts = attempts + 1, not_before = $2, leased_by = NULL, leased_until = NULL WHERE id = $1",
            )
            .bind(id)
            .bind(not_before)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;
            self.channel(id).send(ProgressEvent::progress(0.0)).ok();
            Ok(FailOutcome::Requeued)
        } else {
            let error_json = serde_json::to_value(&error).map_err(|e| CoreError::Parse(e.to_string()))?;
            sqlx::query(
                "UPDATE jobs SET status = 'failed', error = $2, leased_by = NULL, leased_until = NULL WHERE id = $1",
            )
            .bind(id)
            .bind(error_json)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;
            warn!(job_id = %id, %error, "job permanently failed");
            self.channel(id)
                .send(ProgressEvent::terminal(Some(Document::failed(source_url, error))))
                .ok();
            Ok(FailOutcome::Failed)
        }
    }

    async fn cancel(&self, id: Uuid) -> Result<(), CoreError> {
        let row = sqlx::query("UPDATE jobs SET status = 'cancelled' WHERE id = $1 AND status = 'queued' RETURNING id")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;

        if row.is_some() {
            self.channel(id).send(ProgressEvent::terminal(None)).ok();
            return Ok(());
        }

        // Job is active (or already terminal). Persist the request to the
        // row itself rather than process-local state — the worker holding
        // the lease may be in a different process entirely and can only
        // ever learn about this through the database.
        sqlx::query("UPDATE jobs SET cancel_requested = TRUE WHERE id = $1 AND status = 'active'")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let sender = self.channel(id);
        let receiver = sender.subscribe();

        // Snapshot on subscribe, mirroring memory.rs: a fresh subscriber
        // joining a quiescent job (nothing about to change) must still see
        // its current state rather than wait indefinitely for the next
        // delta, which for a job that's already terminal may never come.
        let row = sqlx::query("SELECT status, progress FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        if let Ok(Some(row)) = row {
            let status: String = row.get("status");
            let progress: Option<f64> = row.get("progress");
            let terminal = matches!(status.as_str(), "completed" | "failed" | "cancelled");
            sender
                .send(ProgressEvent { progress, current_doc: None, terminal })
                .ok();
        }

        receiver
    }

    async fn publish_progress(&self, id: Uuid, event: ProgressEvent) {
        if let Some(progress) = event.progress {
            let _ = sqlx::query("UPDATE jobs SET progress = $2 WHERE id = $1")
                .bind(id)
                .bind(progress)
                .execute(&self.pool)
                .await;
        }
        self.channel(id).send(event).ok();
    }

    async fn is_cancelled(&self, id: Uuid) -> bool {
        let row = sqlx::query("SELECT status, cancel_requested FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        match row {
            Ok(Some(r)) => r.get::<String, _>("status") == "cancelled" || r.get::<bool, _>("cancel_requested"),
            _ => false,
        }
    }
}
