//! `PostgresDatabase` is the production backend. It implements every trait in [`crate::traits`].
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{pool::PoolConnection, Connection, PgConnection, PgPool, Postgres};

use super::{job_executions, locks, matches, new_pool};
use crate::{
    db::WaitingGuard,
    db_types::{JobExecutionRecord, JobFinish, MatchRecord, MatchStatus, NewMatch},
    lock_keys::{JobName, LockKey},
    traits::{JobExecutionLog, MatchStore, PoolSnapshot, PoolStats, SessionLockDatabase, StoreError},
};

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
    waiting: Arc<AtomicU32>,
}

impl Debug for PostgresDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PostgresDatabase ({:?})", self.pool_snapshot())
    }
}

/// One physical connection leased from the pool. Dropping it returns the connection to the pool; discarding it
/// (see [`SessionLockDatabase::discard`]) closes it instead.
pub struct PgSession {
    conn: Option<PoolConnection<Postgres>>,
}

impl PgSession {
    pub fn connection(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.conn.as_deref_mut().ok_or(StoreError::SessionDiscarded)
    }
}

impl Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PgSession(open: {})", self.conn.is_some())
    }
}

impl PostgresDatabase {
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        Self::with_acquire_timeout(url, max_connections, DEFAULT_ACQUIRE_TIMEOUT).await
    }

    pub async fn with_acquire_timeout(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = new_pool(url, max_connections, acquire_timeout).await?;
        info!("🗃️ Connected to Postgres with a pool of up to {max_connections} connections");
        Ok(Self { pool, waiting: Arc::new(AtomicU32::new(0)) })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| StoreError::MigrationError(e.to_string()))?;
        info!("🗃️ Migrations complete");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Leases a pooled connection. Every lease this backend takes goes through here, so `waiting` sees all of them.
    async fn acquire(&self) -> Result<PoolConnection<Postgres>, StoreError> {
        let blocked = self.pool.num_idle() == 0 && self.pool.size() >= self.pool.options().get_max_connections();
        let _waiting = WaitingGuard::when_blocked(blocked, &self.waiting);
        self.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => StoreError::PoolTimeout,
            e => StoreError::from(e),
        })
    }
}

impl SessionLockDatabase for PostgresDatabase {
    type Session = PgSession;

    async fn checkout(&self) -> Result<Self::Session, StoreError> {
        let conn = self.acquire().await?;
        Ok(PgSession { conn: Some(conn) })
    }

    async fn try_advisory_lock(&self, session: &mut Self::Session, key: LockKey) -> Result<bool, StoreError> {
        let locked = locks::try_advisory_lock(key, session.connection()?).await?;
        Ok(locked)
    }

    async fn advisory_unlock(&self, session: &mut Self::Session, key: LockKey) -> Result<bool, StoreError> {
        let unlocked = locks::advisory_unlock(key, session.connection()?).await?;
        Ok(unlocked)
    }

    fn discard(&self, session: &mut Self::Session) {
        let Some(conn) = session.conn.take() else {
            return;
        };
        // Detached connections are never returned to the pool. Closing it ends the backend session, and Postgres
        // drops every advisory lock the session held.
        let raw = conn.detach();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = raw.close().await {
                        warn!("🗃️ Error closing a discarded connection. {e}");
                    }
                });
            },
            Err(_) => drop(raw),
        }
    }
}

impl MatchStore for PostgresDatabase {
    async fn insert_match(&self, new_match: NewMatch) -> Result<MatchRecord, StoreError> {
        let mut conn = self.acquire().await?;
        let record = matches::insert_match(new_match, &mut conn).await?;
        debug!("🗃️ Match {} inserted with status {}", record.match_id, record.status);
        Ok(record)
    }

    async fn fetch_match(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError> {
        let mut conn = self.acquire().await?;
        matches::fetch_match(match_id, &mut conn).await
    }

    async fn fetch_matches_with_status(&self, statuses: &[MatchStatus]) -> Result<Vec<MatchRecord>, StoreError> {
        let mut conn = self.acquire().await?;
        matches::fetch_matches_with_status(statuses, &mut conn).await
    }

    async fn modify_match<F, R>(
        &self,
        session: &mut Self::Session,
        match_id: &str,
        modify: F,
    ) -> Result<Option<R>, StoreError>
    where
        F: FnOnce(&mut MatchRecord) -> R + Send,
        R: Send,
    {
        let mut tx = session.connection()?.begin().await?;
        let Some(mut record) = matches::fetch_match_for_update(match_id, &mut tx).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        let original = record.clone();
        let result = modify(&mut record);
        if record != original {
            matches::save_match(&record, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(Some(result))
    }
}

impl JobExecutionLog for PostgresDatabase {
    async fn record_job_start(&self, job_name: JobName, started_at: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut conn = self.acquire().await?;
        let id = job_executions::insert_started(job_name, started_at, &mut conn).await?;
        Ok(id)
    }

    async fn record_job_finish(&self, id: i64, finish: JobFinish) -> Result<(), StoreError> {
        let mut conn = self.acquire().await?;
        job_executions::mark_finished(id, finish, &mut conn).await?;
        Ok(())
    }

    async fn fetch_job_executions(
        &self,
        job_name: JobName,
        limit: usize,
    ) -> Result<Vec<JobExecutionRecord>, StoreError> {
        let mut conn = self.acquire().await?;
        job_executions::fetch_recent(job_name, limit, &mut conn).await
    }

    async fn prune_job_executions(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.acquire().await?;
        let removed = job_executions::prune(cutoff, &mut conn).await?;
        Ok(removed)
    }
}

impl PoolStats for PostgresDatabase {
    fn pool_snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            total: self.pool.size(),
            idle: u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX),
            waiting: self.waiting.load(Ordering::SeqCst),
            max_connections: self.pool.options().get_max_connections(),
        }
    }
}
