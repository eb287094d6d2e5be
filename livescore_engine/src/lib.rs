//! Livescore Engine
//!
//! The livescore engine is the concurrency core of the livescore worker fleet. Several independent writers (the live
//! score feed, the reconciliation sync, the stuck-match watchdog, admin corrections and the computed minute engine)
//! all mutate the same live match records, and every background job runs on every instance of a horizontally scaled
//! fleet. This library makes that safe.
//!
//! The library is divided into these sections:
//! 1. Lock key derivation ([`mod@lock_keys`]) and the closed set of writer sources and their priorities
//!    ([`mod@source`]).
//! 2. Connection-scoped advisory locks ([`mod@session_lock`]). The lock, the critical section and the unlock always
//!    run on the same physical database connection.
//! 3. The job runner ([`mod@job_runner`]), which gives every scheduled job an in-process overlap guard, fleet-wide
//!    exclusion, a timeout and an execution record.
//! 4. The match orchestrator ([`mod@orchestrator`]), which resolves conflicting field updates by source priority and
//!    refuses to touch finished matches.
//! 5. Connection pool health sampling ([`mod@pool_health`]) and metric emission ([`mod@metrics`]).
//! 6. Storage. The behaviour a backend must provide is defined by the traits in [`mod@traits`]. Postgres is the
//!    production backend; [`MemoryDatabase`] emulates the same session semantics in-process for tests and
//!    single-node development.
mod db;

pub mod db_types;
pub mod job_runner;
pub mod lock_keys;
pub mod metrics;
pub mod orchestrator;
pub mod pool_health;
pub mod session_lock;
pub mod source;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use db::memory::{MemoryDatabase, MemorySession};
#[cfg(feature = "postgres")]
pub use db::postgres::{PgSession, PostgresDatabase};
pub use job_runner::{JobContext, JobError, JobOptions, JobRegistry, JobRunOutcome, JobRunner};
pub use orchestrator::{MatchOrchestrator, OrchestratorError, UpdateResult, UpdateStatus};
pub use pool_health::{PoolHealth, PoolHealthConfig, PoolHealthMonitor};
pub use session_lock::{with_lock, LockOutcome, SessionLock};
pub use traits::{JobExecutionLog, MatchStore, PoolSnapshot, PoolStats, SessionLockDatabase, StoreError};
