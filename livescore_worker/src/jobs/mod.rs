//! The periodic jobs run by the worker. Each job is a plain struct with an async `run` method that takes the
//! [`JobContext`](livescore_engine::JobContext) handed out by the job runner. Scheduling, locking and bookkeeping
//! are handled by [`crate::scheduler`].
mod minute_engine;
mod pool_health;
mod retention;
mod watchdog;

pub use minute_engine::{compute_minute, MinuteEngine};
pub use pool_health::PoolHealthJob;
pub use retention::JobHistoryRetention;
pub use watchdog::{is_stuck, StuckMatchWatchdog};
