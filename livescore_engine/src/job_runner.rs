//! # Job runner
//!
//! [`JobRunner::run`] wraps one firing of a background job with the guarantees every scheduled task needs:
//!
//! 1. **Overlap guard.** If the same job is still running in this process, the new firing is skipped.
//! 2. **Fleet-wide exclusion.** If the job has an advisory lock key, the work only runs while this instance holds that
//!    session-scoped lock. If a sibling instance holds it, the firing is skipped.
//! 3. **Timeout.** The work is raced against `timeout`. When the timeout wins, the runner stops waiting, signals
//!    cancellation through the [`JobContext`] and drops the work future. Work that spawns detached tasks must watch
//!    [`JobContext::cancelled`] itself.
//! 4. **Bookkeeping.** A [`JobExecutionRecord`](crate::db_types::JobExecutionRecord) is written per run and `job.*`
//!    metrics are emitted.
//!
//! Errors and panics raised by the work are caught, logged and recorded. They are never retried here and never
//! propagated to the caller, so one misbehaving job cannot take the scheduler down with it.
use std::{
    any::Any,
    collections::HashSet,
    fmt::Debug,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use log::*;
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    db_types::{JobFinish, JobStatus},
    lock_keys::{JobName, LockKey},
    metrics::MetricsSink,
    orchestrator::OrchestratorError,
    session_lock::{with_lock, LockOutcome},
    traits::{JobExecutionLog, SessionLockDatabase, StoreError},
};

pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

//--------------------------------------      JobOptions       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    pub job_name: JobName,
    pub overlap_guard: bool,
    pub advisory_lock_key: Option<LockKey>,
    pub timeout: Duration,
}

impl JobOptions {
    /// Overlap guard on, the job's own lock key, and the default timeout.
    pub fn new(job_name: JobName) -> Self {
        Self {
            job_name,
            overlap_guard: true,
            advisory_lock_key: Some(job_name.lock_key()),
            timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_overlap_guard(mut self, enabled: bool) -> Self {
        self.overlap_guard = enabled;
        self
    }

    pub fn with_advisory_lock_key(mut self, key: Option<LockKey>) -> Self {
        self.advisory_lock_key = key;
        self
    }
}

//--------------------------------------      JobRegistry      ---------------------------------------------------------
/// The set of jobs currently running in this process. Each [`JobRunner`] owns one; clones share state.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    running: Arc<Mutex<HashSet<JobName>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `job` as running. Returns `None` if it already is. The mark is cleared when the guard drops.
    pub fn try_enter(&self, job: JobName) -> Option<RunningJobGuard> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.insert(job) {
            Some(RunningJobGuard { registry: self.clone(), job })
        } else {
            None
        }
    }

    pub fn is_running(&self, job: JobName) -> bool {
        self.running.lock().map(|r| r.contains(&job)).unwrap_or_else(|e| e.into_inner().contains(&job))
    }

    pub fn running_jobs(&self) -> Vec<JobName> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let mut jobs = running.iter().copied().collect::<Vec<JobName>>();
        jobs.sort();
        jobs
    }
}

#[derive(Debug)]
pub struct RunningJobGuard {
    registry: JobRegistry,
    job: JobName,
}

impl Drop for RunningJobGuard {
    fn drop(&mut self) {
        let mut running = self.registry.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.job);
    }
}

//--------------------------------------      JobContext       ---------------------------------------------------------
/// Handed to the work of every run.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_name: JobName,
    execution_id: Option<i64>,
    started_at: DateTime<Utc>,
    cancel: watch::Receiver<bool>,
    rows_affected: Arc<Mutex<Option<u64>>>,
}

impl JobContext {
    pub fn job_name(&self) -> JobName {
        self.job_name
    }

    /// The id of this run's execution record, if the record could be written.
    pub fn execution_id(&self) -> Option<i64> {
        self.execution_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the run has been cancelled, or once the runner has finished with this execution.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        loop {
            if *cancel.borrow_and_update() {
                return;
            }
            if cancel.changed().await.is_err() {
                return;
            }
        }
    }

    /// Reported in the execution record when the run succeeds.
    pub fn set_rows_affected(&self, rows: u64) {
        match self.rows_affected.lock() {
            Ok(mut r) => *r = Some(rows),
            Err(e) => *e.into_inner() = Some(rows),
        }
    }

    fn rows_affected(&self) -> Option<u64> {
        self.rows_affected.lock().map(|r| *r).unwrap_or_else(|e| *e.into_inner())
    }
}

//--------------------------------------       JobError        ---------------------------------------------------------
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Match update failed: {0}")]
    Orchestrator(#[from] OrchestratorError),
    #[error("The job was cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

//--------------------------------------     JobRunOutcome     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRunOutcome {
    Success { duration: Duration, rows_affected: Option<u64> },
    Failed { duration: Duration, error: String },
    TimedOut { duration: Duration },
    /// The job was already running in this process.
    SkippedOverlap,
    /// Another session holds the job's advisory lock.
    SkippedLocked,
}

impl JobRunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobRunOutcome::Success { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, JobRunOutcome::SkippedOverlap | JobRunOutcome::SkippedLocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunOutcome::Success { .. } => "success",
            JobRunOutcome::Failed { .. } => "failed",
            JobRunOutcome::TimedOut { .. } => "timed_out",
            JobRunOutcome::SkippedOverlap => "skipped_overlap",
            JobRunOutcome::SkippedLocked => "skipped_locked",
        }
    }
}

//--------------------------------------       JobRunner       ---------------------------------------------------------
pub struct JobRunner<B> {
    db: B,
    metrics: Arc<dyn MetricsSink>,
    registry: JobRegistry,
}

impl<B> Debug for JobRunner<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobRunner (running: {:?})", self.registry.running_jobs())
    }
}

impl<B: Clone> Clone for JobRunner<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), metrics: self.metrics.clone(), registry: self.registry.clone() }
    }
}

impl<B> JobRunner<B> {
    pub fn new(db: B, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { db, metrics, registry: JobRegistry::new() }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> JobRunner<B>
where B: SessionLockDatabase + JobExecutionLog
{
    /// Runs one firing of a job. Never fails: every way the run can end is described by the returned outcome.
    ///
    /// While the advisory lock is held, the runner keeps one pooled connection checked out for the whole run. Work
    /// that itself needs connections (e.g. calls into the match orchestrator) needs a pool with room for both.
    pub async fn run<F, Fut>(&self, options: &JobOptions, work: F) -> JobRunOutcome
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<(), JobError>>,
    {
        let job = options.job_name;
        let timer = Instant::now();
        let _running = if options.overlap_guard {
            match self.registry.try_enter(job) {
                Some(guard) => Some(guard),
                None => {
                    info!("🕰️ {job} is still running from a previous firing. Skipping this one.");
                    self.record_skip(job, "overlap", timer.elapsed());
                    return JobRunOutcome::SkippedOverlap;
                },
            }
        } else {
            None
        };
        let Some(key) = options.advisory_lock_key else {
            return self.execute(options, work).await;
        };
        let locked =
            with_lock(&self.db, key, async move |_session| Ok::<_, StoreError>(self.execute(options, work).await))
                .await;
        match locked {
            Ok(LockOutcome::Acquired(outcome)) => outcome,
            Ok(LockOutcome::Busy) => {
                info!("🕰️ {job} is running on another instance ({key} is held). Skipping.");
                self.record_skip(job, "locked", timer.elapsed());
                JobRunOutcome::SkippedLocked
            },
            Err(e) => {
                error!("🕰️ Could not take {key} for {job}. {e}");
                let duration = timer.elapsed();
                self.metrics.incr("job.failure", &[("job", job.as_str())]);
                self.metrics.timing("job.duration_ms", duration, &[("job", job.as_str()), ("reason", "lock_error")]);
                JobRunOutcome::Failed { duration, error: e.to_string() }
            },
        }
    }

    /// Firings that never ran still report how long the decision took, tagged with why they were skipped.
    fn record_skip(&self, job: JobName, reason: &str, elapsed: Duration) {
        let tags = [("job", job.as_str()), ("reason", reason)];
        self.metrics.incr("job.skipped", &tags);
        self.metrics.timing("job.duration_ms", elapsed, &tags);
    }

    async fn execute<F, Fut>(&self, options: &JobOptions, work: F) -> JobRunOutcome
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<(), JobError>>,
    {
        let job = options.job_name;
        let tags = [("job", job.as_str())];
        let started_at = Utc::now();
        let execution_id = match self.db.record_job_start(job, started_at).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("🕰️ Could not write the execution record for {job}. Running it anyway. {e}");
                None
            },
        };
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = JobContext {
            job_name: job,
            execution_id,
            started_at,
            cancel: cancel_rx,
            rows_affected: Arc::new(Mutex::new(None)),
        };
        let rows = ctx.clone();
        self.metrics.incr("job.started", &tags);
        debug!("🕰️ {job} started");
        let timer = Instant::now();
        let guarded = AssertUnwindSafe(async move { work(ctx).await }).catch_unwind();
        let result = tokio::time::timeout(options.timeout, guarded).await;
        let duration = timer.elapsed();
        let outcome = match result {
            Ok(Ok(Ok(()))) => JobRunOutcome::Success { duration, rows_affected: rows.rows_affected() },
            Ok(Ok(Err(e))) => JobRunOutcome::Failed { duration, error: e.to_string() },
            Ok(Err(panic)) => JobRunOutcome::Failed { duration, error: panic_message(panic) },
            Err(_) => {
                // Receivers may all be gone already, which is fine
                let _ = cancel_tx.send(true);
                JobRunOutcome::TimedOut { duration }
            },
        };
        self.report(job, &outcome, duration);
        if let Some(id) = execution_id {
            self.record_finish(id, &outcome, duration).await;
        }
        outcome
    }

    fn report(&self, job: JobName, outcome: &JobRunOutcome, duration: Duration) {
        let tags = [("job", job.as_str())];
        match outcome {
            JobRunOutcome::Success { rows_affected, .. } => {
                let rows = rows_affected.map(|n| format!(" {n} rows affected.")).unwrap_or_default();
                info!("🕰️ {job} completed in {}ms.{rows}", duration.as_millis());
                self.metrics.incr("job.success", &tags);
            },
            JobRunOutcome::Failed { error, .. } => {
                error!("🕰️ {job} failed after {}ms. {error}", duration.as_millis());
                self.metrics.incr("job.failure", &tags);
            },
            JobRunOutcome::TimedOut { .. } => {
                error!("🕰️ {job} timed out after {}ms and was cancelled.", duration.as_millis());
                self.metrics.incr("job.timeout", &tags);
            },
            JobRunOutcome::SkippedOverlap | JobRunOutcome::SkippedLocked => return,
        }
        self.metrics.timing("job.duration_ms", duration, &tags);
    }

    async fn record_finish(&self, id: i64, outcome: &JobRunOutcome, duration: Duration) {
        let (status, rows_affected, error_message) = match outcome {
            JobRunOutcome::Success { rows_affected, .. } => {
                (JobStatus::Success, rows_affected.and_then(|n| i64::try_from(n).ok()), None)
            },
            JobRunOutcome::Failed { error, .. } => (JobStatus::Failed, None, Some(error.clone())),
            JobRunOutcome::TimedOut { .. } => (JobStatus::TimedOut, None, Some("Timed out".to_string())),
            JobRunOutcome::SkippedOverlap | JobRunOutcome::SkippedLocked => return,
        };
        let finish = JobFinish {
            finished_at: Utc::now(),
            status,
            duration_ms: i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
            rows_affected,
            error_message,
        };
        if let Err(e) = self.db.record_job_finish(id, finish).await {
            warn!("🕰️ Could not close execution record #{id}. {e}");
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "no details".to_string());
    format!("The job panicked: {detail}")
}
