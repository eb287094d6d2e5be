use chrono::{DateTime, Utc};

use crate::{
    db_types::{JobExecutionRecord, JobFinish},
    lock_keys::JobName,
    traits::StoreError,
};

/// Job run history. Written by the job runner; never consulted for correctness.
#[allow(async_fn_in_trait)]
pub trait JobExecutionLog {
    /// Creates a `running` record and returns its id.
    async fn record_job_start(&self, job_name: JobName, started_at: DateTime<Utc>) -> Result<i64, StoreError>;

    async fn record_job_finish(&self, id: i64, finish: JobFinish) -> Result<(), StoreError>;

    /// The most recent runs of `job_name`, newest first.
    async fn fetch_job_executions(&self, job_name: JobName, limit: usize)
        -> Result<Vec<JobExecutionRecord>, StoreError>;

    /// Deletes finished records that started before `cutoff`. Returns the number of records removed.
    async fn prune_job_executions(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
