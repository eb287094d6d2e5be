//! An in-process backend with the same locking semantics as the Postgres one.
//!
//! The pool is modelled as a set of numbered physical connections. Advisory locks are owned by a connection number,
//! not by whoever happens to be holding the lease, so returning a connection to the pool with a lock still taken
//! leaks that lock exactly the way a real session-scoped lock would. Discarding a session "closes" its connection
//! and frees its locks.
//!
//! All state sits behind one mutex that is never held across an `.await`, which makes every trait method atomic.
use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::*;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
    db::WaitingGuard,
    db_types::{JobExecutionRecord, JobFinish, JobStatus, MatchRecord, MatchStatus, NewMatch},
    lock_keys::{JobName, LockKey},
    traits::{JobExecutionLog, MatchStore, PoolSnapshot, PoolStats, SessionLockDatabase, StoreError},
};

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct MemoryState {
    next_connection: u64,
    open_connections: u32,
    idle: Vec<u64>,
    locks: HashMap<LockKey, u64>,
    matches: HashMap<String, MatchRecord>,
    executions: Vec<JobExecutionRecord>,
    next_execution_id: i64,
}

struct Inner {
    state: Mutex<MemoryState>,
    permits: Arc<Semaphore>,
    max_connections: u32,
    waiting: AtomicU32,
    acquire_timeout: Duration,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock leaves the maps consistent: every mutation is a single insert/remove.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn close_connection(&self, connection: u64) {
        let mut state = self.state();
        state.locks.retain(|_, owner| *owner != connection);
        state.open_connections = state.open_connections.saturating_sub(1);
    }
}

#[derive(Clone)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryDatabase (max_connections: {})", self.inner.max_connections)
    }
}

/// A leased connection from the [`MemoryDatabase`] pool.
pub struct MemorySession {
    connection: u64,
    discarded: bool,
    db: Arc<Inner>,
    _permit: OwnedSemaphorePermit,
}

impl MemorySession {
    pub fn connection_id(&self) -> u64 {
        self.connection
    }

    fn check(&self) -> Result<u64, StoreError> {
        if self.discarded {
            Err(StoreError::SessionDiscarded)
        } else {
            Ok(self.connection)
        }
    }
}

impl Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemorySession(#{}, discarded: {})", self.connection, self.discarded)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.discarded {
            self.db.state().idle.push(self.connection);
        }
    }
}

impl MemoryDatabase {
    pub fn new(max_connections: u32) -> Self {
        Self::with_acquire_timeout(max_connections, DEFAULT_ACQUIRE_TIMEOUT)
    }

    pub fn with_acquire_timeout(max_connections: u32, acquire_timeout: Duration) -> Self {
        let max_connections = max_connections.max(1);
        let inner = Inner {
            state: Mutex::new(MemoryState { next_execution_id: 1, ..Default::default() }),
            permits: Arc::new(Semaphore::new(max_connections as usize)),
            max_connections,
            waiting: AtomicU32::new(0),
            acquire_timeout,
        };
        Self { inner: Arc::new(inner) }
    }

    /// The connection currently holding `key`, if any.
    pub fn lock_holder(&self, key: LockKey) -> Option<u64> {
        self.inner.state().locks.get(&key).copied()
    }

    /// Replaces a stored match wholesale, bypassing conflict resolution. Used to set up fixtures.
    pub fn put_match(&self, record: MatchRecord) {
        self.inner.state().matches.insert(record.match_id.clone(), record);
    }
}

impl SessionLockDatabase for MemoryDatabase {
    type Session = MemorySession;

    async fn checkout(&self) -> Result<Self::Session, StoreError> {
        let permit = {
            let blocked = self.inner.permits.available_permits() == 0;
            let _waiting = WaitingGuard::when_blocked(blocked, &self.inner.waiting);
            let acquire = self.inner.permits.clone().acquire_owned();
            match tokio::time::timeout(self.inner.acquire_timeout, acquire).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) | Err(_) => return Err(StoreError::PoolTimeout),
            }
        };
        let connection = {
            let mut state = self.inner.state();
            match state.idle.pop() {
                Some(connection) => connection,
                None => {
                    state.next_connection += 1;
                    state.open_connections += 1;
                    trace!("🗃️ Opened in-memory connection #{}", state.next_connection);
                    state.next_connection
                },
            }
        };
        Ok(MemorySession { connection, discarded: false, db: self.inner.clone(), _permit: permit })
    }

    async fn try_advisory_lock(&self, session: &mut Self::Session, key: LockKey) -> Result<bool, StoreError> {
        let connection = session.check()?;
        let mut state = self.inner.state();
        match state.locks.get(&key) {
            // Session-level advisory locks are re-entrant for the owning session
            Some(owner) => Ok(*owner == connection),
            None => {
                state.locks.insert(key, connection);
                Ok(true)
            },
        }
    }

    async fn advisory_unlock(&self, session: &mut Self::Session, key: LockKey) -> Result<bool, StoreError> {
        let connection = session.check()?;
        let mut state = self.inner.state();
        match state.locks.get(&key) {
            Some(owner) if *owner == connection => {
                state.locks.remove(&key);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    fn discard(&self, session: &mut Self::Session) {
        if session.discarded {
            return;
        }
        session.discarded = true;
        self.inner.close_connection(session.connection);
        debug!("🗃️ In-memory connection #{} closed", session.connection);
    }
}

impl MatchStore for MemoryDatabase {
    async fn insert_match(&self, new_match: NewMatch) -> Result<MatchRecord, StoreError> {
        let mut state = self.inner.state();
        if state.matches.contains_key(&new_match.match_id) {
            return Err(StoreError::MatchAlreadyExists(new_match.match_id));
        }
        let now = Utc::now();
        let record = MatchRecord {
            match_id: new_match.match_id,
            status: new_match.status,
            fields: new_match.fields,
            provenance: Default::default(),
            created_at: now,
            updated_at: now,
        };
        state.matches.insert(record.match_id.clone(), record.clone());
        Ok(record)
    }

    async fn fetch_match(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError> {
        Ok(self.inner.state().matches.get(match_id).cloned())
    }

    async fn fetch_matches_with_status(&self, statuses: &[MatchStatus]) -> Result<Vec<MatchRecord>, StoreError> {
        let state = self.inner.state();
        let mut result =
            state.matches.values().filter(|m| statuses.contains(&m.status)).cloned().collect::<Vec<MatchRecord>>();
        result.sort_by(|a, b| a.match_id.cmp(&b.match_id));
        Ok(result)
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
        session.check()?;
        let mut state = self.inner.state();
        let Some(original) = state.matches.get(match_id) else {
            return Ok(None);
        };
        let mut record = original.clone();
        let result = modify(&mut record);
        if &record != original {
            record.updated_at = Utc::now();
            state.matches.insert(match_id.to_string(), record);
        }
        Ok(Some(result))
    }
}

impl JobExecutionLog for MemoryDatabase {
    async fn record_job_start(&self, job_name: JobName, started_at: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut state = self.inner.state();
        let id = state.next_execution_id;
        state.next_execution_id += 1;
        state.executions.push(JobExecutionRecord {
            id,
            job_name,
            started_at,
            finished_at: None,
            status: JobStatus::Running,
            duration_ms: None,
            rows_affected: None,
            error_message: None,
        });
        Ok(id)
    }

    async fn record_job_finish(&self, id: i64, finish: JobFinish) -> Result<(), StoreError> {
        let mut state = self.inner.state();
        if let Some(record) = state.executions.iter_mut().find(|r| r.id == id) {
            record.finished_at = Some(finish.finished_at);
            record.status = finish.status;
            record.duration_ms = Some(finish.duration_ms);
            record.rows_affected = finish.rows_affected;
            record.error_message = finish.error_message;
        } else {
            warn!("🗃️ Job execution #{id} does not exist. Its result was not recorded.");
        }
        Ok(())
    }

    async fn fetch_job_executions(
        &self,
        job_name: JobName,
        limit: usize,
    ) -> Result<Vec<JobExecutionRecord>, StoreError> {
        let state = self.inner.state();
        let result = state.executions.iter().rev().filter(|r| r.job_name == job_name).take(limit).cloned().collect();
        Ok(result)
    }

    async fn prune_job_executions(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.inner.state();
        let before = state.executions.len();
        state.executions.retain(|r| r.finished_at.is_none() || r.started_at >= cutoff);
        Ok((before - state.executions.len()) as u64)
    }
}

impl PoolStats for MemoryDatabase {
    fn pool_snapshot(&self) -> PoolSnapshot {
        let state = self.inner.state();
        PoolSnapshot {
            total: state.open_connections,
            idle: state.idle.len() as u32,
            waiting: self.inner.waiting.load(Ordering::SeqCst),
            max_connections: self.inner.max_connections,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lock_keys::match_lock_key;

    #[tokio::test]
    async fn locks_belong_to_connections_not_leases() {
        let db = MemoryDatabase::new(1);
        let key = match_lock_key(Some("m7")).unwrap();
        let mut session = db.checkout().await.unwrap();
        let first_connection = session.connection_id();
        assert!(db.try_advisory_lock(&mut session, key).await.unwrap());
        // Returning the connection with the lock held leaks it, as on a real server
        drop(session);
        assert_eq!(db.lock_holder(key), Some(first_connection));
        let mut session = db.checkout().await.unwrap();
        assert_eq!(session.connection_id(), first_connection);
        assert!(db.advisory_unlock(&mut session, key).await.unwrap());
        assert_eq!(db.lock_holder(key), None);
    }

    #[tokio::test]
    async fn unlock_from_another_connection_is_a_no_op() {
        let db = MemoryDatabase::new(2);
        let key = match_lock_key(Some("m8")).unwrap();
        let mut a = db.checkout().await.unwrap();
        let mut b = db.checkout().await.unwrap();
        assert!(db.try_advisory_lock(&mut a, key).await.unwrap());
        assert!(!db.try_advisory_lock(&mut b, key).await.unwrap());
        assert!(!db.advisory_unlock(&mut b, key).await.unwrap());
        assert_eq!(db.lock_holder(key), Some(a.connection_id()));
        db.discard(&mut a);
        assert_eq!(db.lock_holder(key), None);
        assert!(matches!(db.try_advisory_lock(&mut a, key).await, Err(StoreError::SessionDiscarded)));
    }

    #[tokio::test]
    async fn checkout_times_out_when_the_pool_is_exhausted() {
        let db = MemoryDatabase::with_acquire_timeout(1, Duration::from_millis(20));
        let _held = db.checkout().await.unwrap();
        let err = db.checkout().await.unwrap_err();
        assert!(matches!(err, StoreError::PoolTimeout));
        assert_eq!(db.pool_snapshot().waiting, 0);
    }

    #[tokio::test]
    async fn only_blocked_checkouts_count_as_waiting() {
        let db = MemoryDatabase::new(1);
        let held = db.checkout().await.unwrap();
        assert_eq!(db.pool_snapshot().waiting, 0);
        let blocked = tokio::spawn({
            let db = db.clone();
            async move { db.checkout().await.map(|s| s.connection_id()) }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(db.pool_snapshot().waiting, 1);
        let first_connection = held.connection_id();
        drop(held);
        assert_eq!(blocked.await.unwrap().unwrap(), first_connection);
        assert_eq!(db.pool_snapshot().waiting, 0);
    }

    #[tokio::test]
    async fn pool_snapshot_tracks_leases() {
        let db = MemoryDatabase::new(4);
        let a = db.checkout().await.unwrap();
        let _b = db.checkout().await.unwrap();
        assert_eq!(db.pool_snapshot(), PoolSnapshot { total: 2, idle: 0, waiting: 0, max_connections: 4 });
        drop(a);
        assert_eq!(db.pool_snapshot(), PoolSnapshot { total: 2, idle: 1, waiting: 0, max_connections: 4 });
    }

    #[tokio::test]
    async fn prune_keeps_running_and_recent_executions() {
        let db = MemoryDatabase::new(1);
        let old = Utc::now() - chrono::Duration::days(30);
        let finished = db.record_job_start(JobName::PoolHealth, old).await.unwrap();
        let finish = JobFinish {
            finished_at: old,
            status: JobStatus::Success,
            duration_ms: 3,
            rows_affected: None,
            error_message: None,
        };
        db.record_job_finish(finished, finish).await.unwrap();
        let _still_running = db.record_job_start(JobName::PoolHealth, old).await.unwrap();
        let _recent = db.record_job_start(JobName::PoolHealth, Utc::now()).await.unwrap();
        let removed = db.prune_job_executions(Utc::now() - chrono::Duration::days(14)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.fetch_job_executions(JobName::PoolHealth, 10).await.unwrap().len(), 2);
    }
}
