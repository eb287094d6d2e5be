//! # Livescore worker
//!
//! Runs the periodic livescore jobs against the shared match database:
//!
//! * `stuck_match_watchdog`: ends in-play matches that nobody has updated for a long time.
//! * `minute_engine`: keeps the displayed minute of running matches in step with the clock.
//! * `pool_health`: samples this instance's connection pool.
//! * `job_history_retention`: prunes old job execution records.
//!
//! Any number of worker instances can run side by side. Fleet-wide exclusion, overlap protection, timeouts and job
//! bookkeeping come from [`livescore_engine::JobRunner`].
//!
//! ## Configuration
//! The worker is configured via environment variables. See [config](config/index.html) for more information.
pub mod cli;
pub mod config;
pub mod database_url;
pub mod errors;
pub mod jobs;
pub mod scheduler;
pub mod worker;
