use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};

use crate::{
    db_types::{ConversionError, JobExecutionRecord, JobFinish, JobStatus},
    lock_keys::JobName,
    traits::StoreError,
};

#[derive(Debug, FromRow)]
struct JobExecutionRow {
    id: i64,
    job_name: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
    duration_ms: Option<i64>,
    rows_affected: Option<i64>,
    error_message: Option<String>,
}

impl TryFrom<JobExecutionRow> for JobExecutionRecord {
    type Error = StoreError;

    fn try_from(row: JobExecutionRow) -> Result<Self, Self::Error> {
        let corrupt = |e: ConversionError| StoreError::CorruptRecord(format!("Job execution #{}: {e}", row.id));
        Ok(Self {
            id: row.id,
            job_name: row.job_name.parse::<JobName>().map_err(corrupt)?,
            started_at: row.started_at,
            finished_at: row.finished_at,
            status: row.status.parse::<JobStatus>().map_err(corrupt)?,
            duration_ms: row.duration_ms,
            rows_affected: row.rows_affected,
            error_message: row.error_message,
        })
    }
}

pub async fn insert_started(
    job_name: JobName,
    started_at: DateTime<Utc>,
    conn: &mut PgConnection,
) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO job_executions (job_name, started_at, status) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(job_name.as_str())
    .bind(started_at)
    .bind(JobStatus::Running.as_str())
    .fetch_one(conn)
    .await?;
    Ok(id)
}

pub async fn mark_finished(id: i64, finish: JobFinish, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            UPDATE job_executions
            SET finished_at = $2, status = $3, duration_ms = $4, rows_affected = $5, error_message = $6
            WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(finish.finished_at)
    .bind(finish.status.as_str())
    .bind(finish.duration_ms)
    .bind(finish.rows_affected)
    .bind(finish.error_message)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_recent(
    job_name: JobName,
    limit: usize,
    conn: &mut PgConnection,
) -> Result<Vec<JobExecutionRecord>, StoreError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows: Vec<JobExecutionRow> =
        sqlx::query_as("SELECT * FROM job_executions WHERE job_name = $1 ORDER BY started_at DESC, id DESC LIMIT $2")
            .bind(job_name.as_str())
            .bind(limit)
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(JobExecutionRecord::try_from).collect()
}

pub async fn prune(cutoff: DateTime<Utc>, conn: &mut PgConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM job_executions WHERE finished_at IS NOT NULL AND started_at < $1")
        .bind(cutoff)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
