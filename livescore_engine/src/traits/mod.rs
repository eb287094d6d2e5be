//! # Storage contracts
//!
//! These traits define what a storage backend must provide for the orchestration core to run on it.
//!
//! * [`SessionLockDatabase`] hands out physical connections ("sessions") and runs the session-scoped advisory lock
//!   primitives on them. Everything that needs mutual exclusion goes through this trait via
//!   [`crate::session_lock`].
//! * [`MatchStore`] reads and atomically rewrites live match records, optionally on a locked session.
//! * [`JobExecutionLog`] keeps the per-run job history used for observability.
//! * [`PoolStats`] exposes connection pool utilisation for the health monitor.
//!
//! [`crate::PostgresDatabase`] is the production backend; [`crate::MemoryDatabase`] emulates the same semantics
//! in-process.
mod job_execution_log;
mod match_store;
mod pool_stats;
mod session_lock_database;

pub use job_execution_log::JobExecutionLog;
pub use match_store::MatchStore;
pub use pool_stats::{PoolSnapshot, PoolStats};
pub use session_lock_database::SessionLockDatabase;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Could not run database migrations. {0}")]
    MigrationError(String),
    #[error("The connection for this session has already been discarded")]
    SessionDiscarded,
    #[error("Timed out waiting for a connection from the pool")]
    PoolTimeout,
    #[error("Match {0} already exists")]
    MatchAlreadyExists(String),
    #[error("Stored record could not be decoded. {0}")]
    CorruptRecord(String),
}
