//! The Work Dispatcher: turns Carousel Scheduler decisions into concrete
//! task executions, queued onto a `QueueSink` and run by a
//! bounded-concurrency worker pool, each task kind gated by its own
//! admission window.
//!
//! The worker pool runs `buffer_unordered` over a stream of futures and
//! persists results sequentially. Each task kind has its own admission
//! rate, independent of the others:
//!   scan_next_region   -> 1/minute
//!   validate_tokens    -> 1/hour
//!   optimize_frequency -> 1/day
//!   get_status         -> 4/hour
//! These are modeled with their own sliding-window type rather than reusing
//! `ratelimit::RateGate`, whose two scopes (per-credential, per-client-ip)
//! are fixed to per-second/per-minute windows for inbound ingestion
//! traffic — a different resource than outbound task dispatch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::carousel::CarouselScheduler;
use crate::db::traits::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    ScanNextRegion,
    ValidateTokens,
    OptimizeFrequency,
    GetStatus,
}

impl TaskKind {
    fn window(&self) -> (u32, Duration) {
        match self {
            TaskKind::ScanNextRegion => (1, Duration::from_secs(60)),
            TaskKind::ValidateTokens => (1, Duration::from_secs(3600)),
            TaskKind::OptimizeFrequency => (1, Duration::from_secs(86_400)),
            TaskKind::GetStatus => (4, Duration::from_secs(3600)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::ScanNextRegion => "scan_next_region",
            TaskKind::ValidateTokens => "validate_tokens",
            TaskKind::OptimizeFrequency => "optimize_frequency",
            TaskKind::GetStatus => "get_status",
        }
    }
}

struct Window {
    limit: u32,
    period: Duration,
    entries: Mutex<VecDeque<Instant>>,
}

/// Per-task-kind sliding-window admission, independent of the ingestion
/// rate gate.
pub struct TaskRateLimiter {
    windows: [Window; 4],
}

impl Default for TaskRateLimiter {
    fn default() -> Self {
        let kinds = [TaskKind::ScanNextRegion, TaskKind::ValidateTokens, TaskKind::OptimizeFrequency, TaskKind::GetStatus];
        let windows = kinds.map(|kind| {
            let (limit, period) = kind.window();
            Window { limit, period, entries: Mutex::new(VecDeque::new()) }
        });
        Self { windows }
    }
}

impl TaskRateLimiter {
    fn index(kind: TaskKind) -> usize {
        match kind {
            TaskKind::ScanNextRegion => 0,
            TaskKind::ValidateTokens => 1,
            TaskKind::OptimizeFrequency => 2,
            TaskKind::GetStatus => 3,
        }
    }

    /// True if a task of `kind` may run now; records the admission if so.
    pub fn admit(&self, kind: TaskKind) -> bool {
        let window = &self.windows[Self::index(kind)];
        let now = Instant::now();
        let mut entries = match window.entries.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!(kind = kind.label(), "task rate limiter storage unavailable, failing open");
                return true;
            }
        };
        while let Some(&oldest) = entries.front() {
            if now.duration_since(oldest) >= window.period {
                entries.pop_front();
            } else {
                break;
            }
        }
        if (entries.len() as u32) < window.limit {
            entries.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Where finished/queued task records go. A real deployment backs this with
/// a message broker; tests and the CLI use an in-memory sink.
#[async_trait]
pub trait QueueSink: Send + Sync {
    async fn enqueue(&self, kind: TaskKind, payload: String, attempt: u32) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct InMemoryQueueSink {
    items: Mutex<Vec<(TaskKind, String, u32)>>,
}

impl InMemoryQueueSink {
    pub fn drain(&self) -> Vec<(TaskKind, String, u32)> {
        std::mem::take(&mut self.items.lock().unwrap())
    }
}

#[async_trait]
impl QueueSink for InMemoryQueueSink {
    async fn enqueue(&self, kind: TaskKind, payload: String, attempt: u32) -> anyhow::Result<()> {
        self.items.lock().unwrap().push((kind, payload, attempt));
        Ok(())
    }
}

/// Outcome of one dispatch attempt, used by the CLI/`status` surface.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub kind: TaskKind,
    pub ran: bool,
    pub detail: String,
}

#[derive(Default)]
struct TaskStat {
    count: AtomicU64,
    total_nanos: AtomicU64,
}

/// Per-task-kind invocation counts and cumulative wall-clock duration,
/// recorded around every dispatch attempt (rate-limited or not).
#[derive(Default)]
pub struct TaskMetrics {
    stats: [TaskStat; 4],
}

impl TaskMetrics {
    fn record(&self, kind: TaskKind, elapsed: Duration) {
        let stat = &self.stats[TaskRateLimiter::index(kind)];
        stat.count.fetch_add(1, Ordering::Relaxed);
        stat.total_nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    /// `(kind, invocation count, cumulative duration)` for every task kind.
    pub fn snapshot(&self) -> Vec<(TaskKind, u64, Duration)> {
        [TaskKind::ScanNextRegion, TaskKind::ValidateTokens, TaskKind::OptimizeFrequency, TaskKind::GetStatus]
            .into_iter()
            .map(|kind| {
                let stat = &self.stats[TaskRateLimiter::index(kind)];
                let count = stat.count.load(Ordering::Relaxed);
                let total = Duration::from_nanos(stat.total_nanos.load(Ordering::Relaxed));
                (kind, count, total)
            })
            .collect()
    }
}

/// Binds the Carousel Scheduler's decisions to concrete task executions,
/// behind per-kind rate limiting and bounded concurrency.
pub struct WorkDispatcher {
    scheduler: CarouselScheduler,
    limiter: TaskRateLimiter,
    metrics: TaskMetrics,
    concurrency: usize,
}

impl WorkDispatcher {
    pub fn new(scheduler: CarouselScheduler, concurrency: usize) -> Self {
        Self {
            scheduler,
            limiter: TaskRateLimiter::default(),
            metrics: TaskMetrics::default(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn metrics(&self) -> &TaskMetrics {
        &self.metrics
    }

    /// The underlying scheduler, for callers that need to close out a task
    /// (`mark_scan_finished`, `invalidate_credential`) after running the
    /// work a queued item names.
    pub fn scheduler(&self) -> &CarouselScheduler {
        &self.scheduler
    }

    /// `scan_next_region`: ask the scheduler for the next region/credential
    /// pair, record a `CarouselTask`, and hand it to `queue` — idempotent at
    /// the LIP level since actual ingestion (via `upsert_post_stats`) is
    /// keyed on the post's LIP fingerprint downstream.
    pub async fn scan_next_region(&self, db: &dyn Database, queue: &dyn QueueSink, now_unix: i64) -> anyhow::Result<DispatchOutcome> {
        let started = Instant::now();
        let outcome = self.scan_next_region_inner(db, queue, now_unix).await;
        self.metrics.record(TaskKind::ScanNextRegion, started.elapsed());
        outcome
    }

    async fn scan_next_region_inner(&self, db: &dyn Database, queue: &dyn QueueSink, now_unix: i64) -> anyhow::Result<DispatchOutcome> {
        if !self.limiter.admit(TaskKind::ScanNextRegion) {
            return Ok(DispatchOutcome { kind: TaskKind::ScanNextRegion, ran: false, detail: "rate limited".into() });
        }

        match self.scheduler.select_next(db, now_unix).await? {
            None => Ok(DispatchOutcome { kind: TaskKind::ScanNextRegion, ran: true, detail: "no eligible region/credential pair".into() }),
            Some((region, credential)) => {
                let task_id = db.create_carousel_task(&region.code, &credential.name).await?;
                self.scheduler.mark_scan_started(db, &region.code, &credential.name).await?;
                queue.enqueue(TaskKind::ScanNextRegion, format!("{}:{}", region.code, task_id), 0).await?;
                info!(region = region.code, credential = credential.name, task_id, "scan task queued");
                Ok(DispatchOutcome {
                    kind: TaskKind::ScanNextRegion,
                    ran: true,
                    detail: format!("queued task {task_id} for region {}", region.code),
                })
            }
        }
    }

    /// `validate_tokens`: re-check each credential's usability, invalidating
    /// ones whose most recent failure looked like an auth failure.
    pub async fn validate_tokens(&self, db: &dyn Database, credentials: &[(String, bool, Option<String>)]) -> anyhow::Result<DispatchOutcome> {
        let started = Instant::now();
        let outcome = self.validate_tokens_inner(db, credentials).await;
        self.metrics.record(TaskKind::ValidateTokens, started.elapsed());
        outcome
    }

    async fn validate_tokens_inner(&self, db: &dyn Database, credentials: &[(String, bool, Option<String>)]) -> anyhow::Result<DispatchOutcome> {
        if !self.limiter.admit(TaskKind::ValidateTokens) {
            return Ok(DispatchOutcome { kind: TaskKind::ValidateTokens, ran: false, detail: "rate limited".into() });
        }

        let mut invalidated = 0u32;
        for (name, is_valid, reason) in credentials {
            if !is_valid {
                let reason = reason.clone().unwrap_or_else(|| "token invalid".to_string());
                self.scheduler.invalidate_credential(db, name, &reason).await?;
                invalidated += 1;
            }
        }
        Ok(DispatchOutcome {
            kind: TaskKind::ValidateTokens,
            ran: true,
            detail: format!("{invalidated} credential(s) invalidated"),
        })
    }

    /// `optimize_frequency`: daily self-tuning of the carousel's min scan
    /// interval from the last 24h's median yield.
    pub async fn optimize_frequency(&self, db: &dyn Database) -> anyhow::Result<DispatchOutcome> {
        let started = Instant::now();
        let outcome = self.optimize_frequency_inner(db).await;
        self.metrics.record(TaskKind::OptimizeFrequency, started.elapsed());
        outcome
    }

    async fn optimize_frequency_inner(&self, db: &dyn Database) -> anyhow::Result<DispatchOutcome> {
        if !self.limiter.admit(TaskKind::OptimizeFrequency) {
            return Ok(DispatchOutcome { kind: TaskKind::OptimizeFrequency, ran: false, detail: "rate limited".into() });
        }
        let interval = self.scheduler.tune_frequency(db).await?;
        Ok(DispatchOutcome { kind: TaskKind::OptimizeFrequency, ran: true, detail: format!("min_interval_minutes={interval}") })
    }

    /// `get_status`: cheap, frequently-polled summary — admission only,
    /// no side effects.
    pub fn get_status(&self) -> DispatchOutcome {
        let started = Instant::now();
        let outcome = if !self.limiter.admit(TaskKind::GetStatus) {
            DispatchOutcome { kind: TaskKind::GetStatus, ran: false, detail: "rate limited".into() }
        } else {
            DispatchOutcome { kind: TaskKind::GetStatus, ran: true, detail: "ok".into() }
        };
        self.metrics.record(TaskKind::GetStatus, started.elapsed());
        outcome
    }

    /// Run a batch of already-queued scan tasks with bounded concurrency,
    /// cooperatively cancellable via `cancel` (checked at the start of each
    /// task future, i.e. the next scheduling point after the flag flips).
    pub async fn run_pool<F, Fut>(&self, tasks: Vec<i64>, cancel: &Arc<AtomicBool>, work: F) -> Vec<anyhow::Result<()>>
    where
        F: Fn(i64) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
    {
        stream::iter(tasks.into_iter().map(|task_id| {
            let cancel = Arc::clone(cancel);
            async move {
                if cancel.load(Ordering::Relaxed) {
                    return Err(anyhow::anyhow!("dispatch cancelled before task {task_id} started"));
                }
                work(task_id).await
            }
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::CredentialStatus;
    use crate::db::sqlite::SqliteDatabase;

    async fn test_db() -> SqliteDatabase {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::schema::create_tables(&conn).unwrap();
        SqliteDatabase::new(conn)
    }

    #[tokio::test]
    async fn scan_next_region_queues_and_then_rate_limits() {
        let db = test_db().await;
        db.create_region("akv", "Akvitaniya", "outlet-akv").await.unwrap();
        db.create_credential("cred-a", "secret-a").await.unwrap();
        db.mark_credential_status("cred-a", CredentialStatus::Valid, None).await.unwrap();

        let dispatcher = WorkDispatcher::new(CarouselScheduler::default(), 4);
        let sink = InMemoryQueueSink::default();

        let first = dispatcher.scan_next_region(&db, &sink, 1_000).await.unwrap();
        assert!(first.ran);
        assert_eq!(sink.drain().len(), 1);

        let second = dispatcher.scan_next_region(&db, &sink, 1_001).await.unwrap();
        assert!(!second.ran);
        assert_eq!(second.detail, "rate limited");
    }

    #[tokio::test]
    async fn validate_tokens_invalidates_failed_credentials() {
        let db = test_db().await;
        db.create_credential("cred-a", "secret-a").await.unwrap();
        db.mark_credential_status("cred-a", CredentialStatus::Valid, None).await.unwrap();

        let dispatcher = WorkDispatcher::new(CarouselScheduler::default(), 4);
        let outcome = dispatcher
            .validate_tokens(&db, &[("cred-a".to_string(), false, Some("token invalid".to_string()))])
            .await
            .unwrap();
        assert!(outcome.ran);
        assert_eq!(outcome.detail, "1 credential(s) invalidated");

        let credential = db.get_credential_by_name("cred-a").await.unwrap().unwrap();
        assert_eq!(credential.status, CredentialStatus::Invalid);
    }

    #[test]
    fn task_rate_limiter_enforces_independent_windows() {
        let limiter = TaskRateLimiter::default();
        assert!(limiter.admit(TaskKind::ScanNextRegion));
        assert!(!limiter.admit(TaskKind::ScanNextRegion));
        assert!(limiter.admit(TaskKind::GetStatus));
        assert!(limiter.admit(TaskKind::GetStatus));
        assert!(limiter.admit(TaskKind::GetStatus));
        assert!(limiter.admit(TaskKind::GetStatus));
        assert!(!limiter.admit(TaskKind::GetStatus));
    }

    #[tokio::test]
    async fn metrics_count_every_dispatch_attempt_including_rate_limited_ones() {
        let db = test_db().await;
        let dispatcher = WorkDispatcher::new(CarouselScheduler::default(), 4);
        let sink = InMemoryQueueSink::default();

        dispatcher.scan_next_region(&db, &sink, 1_000).await.unwrap();
        dispatcher.scan_next_region(&db, &sink, 1_001).await.unwrap();

        let snapshot = dispatcher.metrics().snapshot();
        let (_, count, _) = snapshot.iter().find(|(kind, _, _)| *kind == TaskKind::ScanNextRegion).unwrap();
        assert_eq!(*count, 2);
    }
}
