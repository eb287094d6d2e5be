use std::sync::{atomic::AtomicUsize, Arc};

use cucumber::World;
use livescore_engine::{
    lock_keys::LockKey,
    metrics::RecordingMetrics,
    JobRunOutcome,
    JobRunner,
    MatchOrchestrator,
    MemoryDatabase,
    MemorySession,
    UpdateResult,
};

#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct LiveScoreWorld {
    pub db: MemoryDatabase,
    pub metrics: RecordingMetrics,
    pub orchestrator: MatchOrchestrator<MemoryDatabase>,
    pub runner: JobRunner<MemoryDatabase>,
    pub last_update: Option<UpdateResult>,
    pub job_outcomes: Vec<JobRunOutcome>,
    pub work_calls: Arc<AtomicUsize>,
    pub lock_keys: Vec<Option<LockKey>>,
    /// Connections holding locks on behalf of "another instance".
    pub foreign_sessions: Vec<MemorySession>,
}

impl LiveScoreWorld {
    pub fn new() -> Self {
        let db = MemoryDatabase::new(8);
        let metrics = RecordingMetrics::new();
        let orchestrator = MatchOrchestrator::new(db.clone(), Arc::new(metrics.clone()));
        let runner = JobRunner::new(db.clone(), Arc::new(metrics.clone()));
        Self {
            db,
            metrics,
            orchestrator,
            runner,
            last_update: None,
            job_outcomes: Vec::new(),
            work_calls: Arc::new(AtomicUsize::new(0)),
            lock_keys: Vec::new(),
            foreign_sessions: Vec::new(),
        }
    }

    pub fn last_update(&self) -> &UpdateResult {
        self.last_update.as_ref().expect("No update has been submitted")
    }

    pub fn last_outcome(&self) -> &JobRunOutcome {
        self.job_outcomes.last().expect("No job has fired")
    }
}
