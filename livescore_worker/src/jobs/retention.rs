use chrono::{Duration, Utc};
use livescore_engine::{JobContext, JobError, JobExecutionLog};
use log::*;

/// Deletes finished job execution records that are older than the retention window.
#[derive(Debug, Clone)]
pub struct JobHistoryRetention<B> {
    db: B,
    retention: Duration,
}

impl<B: JobExecutionLog> JobHistoryRetention<B> {
    pub fn new(db: B, retention: Duration) -> Self {
        Self { db, retention }
    }

    pub async fn run(&self, ctx: JobContext) -> Result<(), JobError> {
        let cutoff = Utc::now() - self.retention;
        let removed = self.db.prune_job_executions(cutoff).await?;
        if removed > 0 {
            info!("🕰️ Removed {removed} job execution records from before {cutoff}");
        }
        ctx.set_rows_affected(removed);
        Ok(())
    }
}
