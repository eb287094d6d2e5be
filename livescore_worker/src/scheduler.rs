//! # Scheduler
//!
//! Runs every enabled job on its own interval, through a single [`JobRunner`]. All job loops are driven concurrently
//! from one task, so the backend's futures never need to be `Send`.
//!
//! Every instance of the fleet runs the same schedule. The runner's advisory locks make sure that a job body only
//! runs on one instance at a time, and its registry makes sure a slow run is never overlapped by the next tick on the
//! same instance.
//!
//! On shutdown, no new firings are started. Jobs that are already running are allowed to finish, bounded by their
//! own timeouts.
use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use livescore_engine::{
    lock_keys::JobName,
    metrics::MetricsSink,
    JobContext,
    JobError,
    JobExecutionLog,
    JobOptions,
    JobRunOutcome,
    JobRunner,
    MatchOrchestrator,
    MatchStore,
    PoolHealthMonitor,
    PoolStats,
};
use log::*;
use tokio::{sync::watch, time::MissedTickBehavior};

use crate::{
    config::WorkerConfig,
    jobs::{JobHistoryRetention, MinuteEngine, PoolHealthJob, StuckMatchWatchdog},
};

const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(120);
const MINUTE_ENGINE_TIMEOUT: Duration = Duration::from_secs(60);
const POOL_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
const RETENTION_TIMEOUT: Duration = Duration::from_secs(300);
const RETENTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Everything the built-in jobs need from storage.
pub trait WorkerBackend: MatchStore + JobExecutionLog + PoolStats {}

impl<T> WorkerBackend for T where T: MatchStore + JobExecutionLog + PoolStats {}

//--------------------------------------       WorkerJob       ---------------------------------------------------------
#[derive(Debug)]
pub enum WorkerJob<B> {
    StuckMatchWatchdog(StuckMatchWatchdog<B>),
    MinuteEngine(MinuteEngine<B>),
    PoolHealth(PoolHealthJob<B>),
    JobHistoryRetention(JobHistoryRetention<B>),
}

impl<B: WorkerBackend> WorkerJob<B> {
    pub fn name(&self) -> JobName {
        match self {
            WorkerJob::StuckMatchWatchdog(_) => JobName::StuckMatchWatchdog,
            WorkerJob::MinuteEngine(_) => JobName::MinuteEngine,
            WorkerJob::PoolHealth(_) => JobName::PoolHealth,
            WorkerJob::JobHistoryRetention(_) => JobName::JobHistoryRetention,
        }
    }

    pub async fn run(&self, ctx: JobContext) -> Result<(), JobError> {
        match self {
            WorkerJob::StuckMatchWatchdog(job) => job.run(ctx).await,
            WorkerJob::MinuteEngine(job) => job.run(ctx).await,
            WorkerJob::PoolHealth(job) => job.run(ctx).await,
            WorkerJob::JobHistoryRetention(job) => job.run(ctx).await,
        }
    }
}

//--------------------------------------     ScheduledJob      ---------------------------------------------------------
#[derive(Debug)]
pub struct ScheduledJob<B> {
    pub options: JobOptions,
    pub interval: Duration,
    pub job: WorkerJob<B>,
}

impl<B: WorkerBackend> ScheduledJob<B> {
    /// Schedules `job` with its own lock key, the overlap guard and the given timeout.
    pub fn new(job: WorkerJob<B>, interval: Duration, timeout: Duration) -> Self {
        let options = JobOptions::new(job.name()).with_timeout(timeout);
        Self { options, interval, job }
    }
}

//--------------------------------------       Scheduler       ---------------------------------------------------------
pub struct Scheduler<B> {
    runner: JobRunner<B>,
    jobs: Vec<ScheduledJob<B>>,
}

impl<B> std::fmt::Debug for Scheduler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Scheduler ({} jobs, {:?})", self.jobs.len(), self.runner)
    }
}

impl<B: WorkerBackend> Scheduler<B> {
    pub fn new(runner: JobRunner<B>) -> Self {
        Self { runner, jobs: Vec::new() }
    }

    /// Builds the standard schedule from `config`, leaving out disabled jobs.
    pub fn from_config(db: B, metrics: Arc<dyn MetricsSink>, config: &WorkerConfig) -> Self {
        let orchestrator = MatchOrchestrator::new(db.clone(), metrics.clone());
        let mut scheduler = Self::new(JobRunner::new(db.clone(), metrics.clone()));
        let monitor = PoolHealthMonitor::new(db.clone(), config.pool_health.clone(), metrics);
        let mut pool_health = ScheduledJob::new(
            WorkerJob::PoolHealth(PoolHealthJob::new(monitor)),
            config.pool_sample_interval,
            POOL_HEALTH_TIMEOUT,
        );
        pool_health.options = pool_health.options.with_advisory_lock_key(None);
        let candidates = [
            ScheduledJob::new(
                WorkerJob::StuckMatchWatchdog(StuckMatchWatchdog::new(
                    orchestrator.clone(),
                    config.watchdog_stale_after,
                )),
                config.watchdog_interval,
                WATCHDOG_TIMEOUT,
            ),
            ScheduledJob::new(
                WorkerJob::MinuteEngine(MinuteEngine::new(orchestrator)),
                config.minute_engine_interval,
                MINUTE_ENGINE_TIMEOUT,
            ),
            pool_health,
            ScheduledJob::new(
                WorkerJob::JobHistoryRetention(JobHistoryRetention::new(db, config.job_history_retention)),
                RETENTION_INTERVAL,
                RETENTION_TIMEOUT,
            ),
        ];
        for job in candidates {
            let name = job.options.job_name;
            if config.is_enabled(name) {
                scheduler.add(job);
            } else {
                info!("🕰️ {name} is disabled on this instance");
            }
        }
        scheduler
    }

    pub fn add(&mut self, job: ScheduledJob<B>) -> &mut Self {
        self.jobs.push(job);
        self
    }

    pub fn job_names(&self) -> Vec<JobName> {
        self.jobs.iter().map(|j| j.options.job_name).collect()
    }

    pub fn runner(&self) -> &JobRunner<B> {
        &self.runner
    }

    /// Fires every scheduled job once, one after the other.
    pub async fn run_once(&self) -> Vec<(JobName, JobRunOutcome)> {
        let mut outcomes = Vec::with_capacity(self.jobs.len());
        for scheduled in &self.jobs {
            let outcome = self.fire(scheduled).await;
            outcomes.push((scheduled.options.job_name, outcome));
        }
        outcomes
    }

    /// Runs the schedule until `shutdown` resolves, then waits for running jobs to finish.
    pub async fn run_until<S>(&self, shutdown: S)
    where S: std::future::Future<Output = ()> {
        if self.jobs.is_empty() {
            warn!("🕰️ No jobs are scheduled. The scheduler has nothing to do.");
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let loops = join_all(self.jobs.iter().map(|scheduled| self.drive(scheduled, stop_rx.clone())));
        tokio::pin!(loops);
        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut loops => return,
            _ = &mut shutdown => {},
        }
        info!("🕰️ Shutdown requested. Waiting for running jobs to finish.");
        if stop_tx.send(true).is_err() {
            debug!("🕰️ All job loops had already stopped");
        }
        loops.await;
        info!("🕰️ Scheduler stopped");
    }

    async fn drive(&self, scheduled: &ScheduledJob<B>, mut stop: watch::Receiver<bool>) {
        let name = scheduled.options.job_name;
        let mut timer = tokio::time::interval(scheduled.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("🕰️ {name} scheduled every {:?}", scheduled.interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {},
                _ = stop.changed() => break,
            }
            if *stop.borrow() {
                break;
            }
            self.fire(scheduled).await;
        }
        debug!("🕰️ {name} loop stopped");
    }

    async fn fire(&self, scheduled: &ScheduledJob<B>) -> JobRunOutcome {
        let outcome = self.runner.run(&scheduled.options, |ctx| scheduled.job.run(ctx)).await;
        trace!("🕰️ {} finished: {}", scheduled.options.job_name, outcome.as_str());
        outcome
    }
}
