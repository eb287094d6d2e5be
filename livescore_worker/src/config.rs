//! Worker configuration, read from `LSW_*` environment variables.
//!
//! Every setting has a default. Missing or unparseable values are logged and the default is used instead. The one
//! exception is `LSW_DISABLED_JOBS`: naming a job that does not exist is almost certainly a typo that would leave a
//! job running that the operator meant to switch off, so it stops the worker at startup.
use std::{env, fmt::Display, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use livescore_engine::{lock_keys::JobName, PoolHealthConfig};
use log::*;

use crate::{database_url::DatabaseUrl, errors::WorkerError};

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
/// A job holds one connection for its advisory lock and its work needs at least one more.
const MIN_DB_CONNECTIONS: u32 = 2;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POOL_SAMPLE_SECS: u64 = 30;
const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 60;
const DEFAULT_WATCHDOG_STALE_MINUTES: u32 = 150;
const MAX_WATCHDOG_STALE_MINUTES: u32 = 7 * 24 * 60;
const DEFAULT_MINUTE_ENGINE_INTERVAL_SECS: u64 = 20;
const DEFAULT_JOB_HISTORY_RETENTION_DAYS: u32 = 14;
const MAX_JOB_HISTORY_RETENTION_DAYS: u32 = 3650;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: DatabaseUrl,
    pub db_max_connections: u32,
    /// How long a caller waits for a pooled connection before giving up.
    pub db_acquire_timeout: StdDuration,
    pub pool_health: PoolHealthConfig,
    pub pool_sample_interval: StdDuration,
    pub watchdog_interval: StdDuration,
    /// A live match that has not been updated for this long, and kicked off at least this long ago, is ended by the
    /// watchdog.
    pub watchdog_stale_after: Duration,
    pub minute_engine_interval: StdDuration,
    /// Job execution records older than this are deleted.
    pub job_history_retention: Duration,
    pub disabled_jobs: Vec<JobName>,
    pub skip_migrations: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: DatabaseUrl::default(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            db_acquire_timeout: StdDuration::from_secs(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS),
            pool_health: PoolHealthConfig::default(),
            pool_sample_interval: StdDuration::from_secs(DEFAULT_POOL_SAMPLE_SECS),
            watchdog_interval: StdDuration::from_secs(DEFAULT_WATCHDOG_INTERVAL_SECS),
            watchdog_stale_after: Duration::minutes(i64::from(DEFAULT_WATCHDOG_STALE_MINUTES)),
            minute_engine_interval: StdDuration::from_secs(DEFAULT_MINUTE_ENGINE_INTERVAL_SECS),
            job_history_retention: Duration::days(i64::from(DEFAULT_JOB_HISTORY_RETENTION_DAYS)),
            disabled_jobs: Vec::new(),
            skip_migrations: false,
        }
    }
}

impl WorkerConfig {
    pub fn from_env_or_default() -> Result<Self, WorkerError> {
        let database_url = match env::var("LSW_DATABASE_URL") {
            Ok(raw) => DatabaseUrl::parse(&raw)?,
            Err(_) => {
                error!("🪛️ LSW_DATABASE_URL is not set. Please set it to the URL for the livescore database.");
                DatabaseUrl::default()
            },
        };
        let db_max_connections = parse_env("LSW_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS);
        let db_max_connections = if db_max_connections < MIN_DB_CONNECTIONS {
            warn!("🪛️ LSW_DB_MAX_CONNECTIONS must be at least {MIN_DB_CONNECTIONS}. Using {MIN_DB_CONNECTIONS}.");
            MIN_DB_CONNECTIONS
        } else {
            db_max_connections
        };
        let db_acquire_timeout =
            StdDuration::from_secs(parse_env("LSW_DB_ACQUIRE_TIMEOUT_SECS", DEFAULT_DB_ACQUIRE_TIMEOUT_SECS));
        let defaults = PoolHealthConfig::default();
        let (warn_threshold, critical_threshold) = validate_thresholds(
            parse_env("LSW_POOL_WARN_THRESHOLD", defaults.warn_threshold),
            parse_env("LSW_POOL_CRITICAL_THRESHOLD", defaults.critical_threshold),
        );
        let pool_health = PoolHealthConfig { warn_threshold, critical_threshold, ..defaults };
        let pool_sample_interval = seconds(parse_env("LSW_POOL_SAMPLE_SECS", DEFAULT_POOL_SAMPLE_SECS));
        let watchdog_interval = seconds(parse_env("LSW_WATCHDOG_INTERVAL_SECS", DEFAULT_WATCHDOG_INTERVAL_SECS));
        let watchdog_stale_after = stale_window(env::var("LSW_WATCHDOG_STALE_MINUTES").ok());
        let minute_engine_interval =
            seconds(parse_env("LSW_MINUTE_ENGINE_INTERVAL_SECS", DEFAULT_MINUTE_ENGINE_INTERVAL_SECS));
        let job_history_retention = retention_window(env::var("LSW_JOB_HISTORY_RETENTION_DAYS").ok());
        let disabled_jobs = match env::var("LSW_DISABLED_JOBS") {
            Ok(s) => parse_job_list(&s)?,
            Err(_) => Vec::new(),
        };
        if !disabled_jobs.is_empty() {
            let names = disabled_jobs.iter().map(|j| j.as_str()).collect::<Vec<&str>>().join(", ");
            info!("🪛️ Disabled jobs: {names}");
        }
        let skip_migrations = env::var("LSW_SKIP_MIGRATIONS").map(|s| is_truthy(&s)).unwrap_or(false);
        Ok(Self {
            database_url,
            db_max_connections,
            db_acquire_timeout,
            pool_health,
            pool_sample_interval,
            watchdog_interval,
            watchdog_stale_after,
            minute_engine_interval,
            job_history_retention,
            disabled_jobs,
            skip_migrations,
        })
    }

    pub fn is_enabled(&self, job: JobName) -> bool {
        !self.disabled_jobs.contains(&job)
    }
}

fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    parse_value(name, env::var(name).ok(), default)
}

fn parse_value<T>(name: &str, value: Option<String>, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(s) = value else {
        info!("🪛️ {name} is not set. Using the default value of {default}.");
        return default;
    };
    s.trim().parse::<T>().unwrap_or_else(|e| {
        warn!("🪛️ Invalid configuration value for {name} ({s}). {e}. Using the default value of {default} instead.");
        default
    })
}

/// Parses a whole number that must lie in `min..=max`. Anything else falls back to `default`.
fn parse_bounded(name: &str, value: Option<String>, default: u32, min: u32, max: u32) -> u32 {
    let parsed = parse_value(name, value, default);
    if (min..=max).contains(&parsed) {
        parsed
    } else {
        warn!("🪛️ {name} must be between {min} and {max}, but got {parsed}. Using the default value of {default}.");
        default
    }
}

/// The watchdog's stale window, between one minute and one week.
fn stale_window(value: Option<String>) -> Duration {
    let minutes = parse_bounded(
        "LSW_WATCHDOG_STALE_MINUTES",
        value,
        DEFAULT_WATCHDOG_STALE_MINUTES,
        1,
        MAX_WATCHDOG_STALE_MINUTES,
    );
    Duration::try_minutes(i64::from(minutes)).unwrap_or_else(|| WorkerConfig::default().watchdog_stale_after)
}

/// How long job history is kept, between one day and ten years.
fn retention_window(value: Option<String>) -> Duration {
    let days = parse_bounded(
        "LSW_JOB_HISTORY_RETENTION_DAYS",
        value,
        DEFAULT_JOB_HISTORY_RETENTION_DAYS,
        1,
        MAX_JOB_HISTORY_RETENTION_DAYS,
    );
    Duration::try_days(i64::from(days)).unwrap_or_else(|| WorkerConfig::default().job_history_retention)
}

/// Zero-length intervals would make the scheduler spin.
fn seconds(secs: u64) -> StdDuration {
    StdDuration::from_secs(secs.max(1))
}

fn is_truthy(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn validate_thresholds(warn: f64, critical: f64) -> (f64, f64) {
    if 0.0 < warn && warn <= critical && critical <= 1.0 {
        (warn, critical)
    } else {
        let defaults = PoolHealthConfig::default();
        warn!(
            "🪛️ Pool thresholds must satisfy 0 < warn <= critical <= 1, but got {warn} and {critical}. Using {} and {} \
             instead.",
            defaults.warn_threshold, defaults.critical_threshold
        );
        (defaults.warn_threshold, defaults.critical_threshold)
    }
}

/// Parses a comma-separated list of job names. Blank entries are ignored; unknown names are an error.
pub fn parse_job_list(s: &str) -> Result<Vec<JobName>, WorkerError> {
    let mut jobs = Vec::new();
    for name in s.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let job = name
            .parse::<JobName>()
            .map_err(|e| WorkerError::ConfigurationError(format!("LSW_DISABLED_JOBS: {e}")))?;
        if !jobs.contains(&job) {
            jobs.push(job);
        }
    }
    Ok(jobs)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn job_lists() {
        assert!(parse_job_list("").unwrap().is_empty());
        assert_eq!(
            parse_job_list(" minute_engine, ,pool_health,minute_engine").unwrap(),
            vec![JobName::MinuteEngine, JobName::PoolHealth]
        );
        let err = parse_job_list("minute_engine,stuck_match_watchdgo").unwrap_err();
        assert!(matches!(err, WorkerError::ConfigurationError(_)));
        assert!(err.to_string().contains("stuck_match_watchdgo"));
    }

    #[test]
    fn values_fall_back_to_defaults() {
        assert_eq!(parse_value("LSW_DB_MAX_CONNECTIONS", None, 10u32), 10);
        assert_eq!(parse_value("LSW_DB_MAX_CONNECTIONS", Some(" 25 ".into()), 10u32), 25);
        assert_eq!(parse_value("LSW_DB_MAX_CONNECTIONS", Some("lots".into()), 10u32), 10);
        assert_eq!(parse_value("LSW_POOL_WARN_THRESHOLD", Some("0.7".into()), 0.8), 0.7);
    }

    #[test]
    fn stale_window_is_bounded() {
        let default = Duration::minutes(150);
        assert_eq!(stale_window(None), default);
        assert_eq!(stale_window(Some("90".into())), Duration::minutes(90));
        assert_eq!(stale_window(Some("-5".into())), default);
        assert_eq!(stale_window(Some("0".into())), default);
        assert_eq!(stale_window(Some(i64::MAX.to_string())), default);
        assert_eq!(stale_window(Some("20000".into())), default);
    }

    #[test]
    fn retention_window_is_bounded() {
        let default = Duration::days(14);
        assert_eq!(retention_window(Some("30".into())), Duration::days(30));
        assert_eq!(retention_window(Some("-5".into())), default);
        assert_eq!(retention_window(Some("0".into())), default);
        assert_eq!(retention_window(Some(i64::MAX.to_string())), default);
        assert_eq!(retention_window(Some("36500".into())), default);
    }

    #[test]
    fn thresholds_must_be_ordered() {
        assert_eq!(validate_thresholds(0.5, 0.75), (0.5, 0.75));
        assert_eq!(validate_thresholds(0.95, 0.9), (0.8, 0.9));
        assert_eq!(validate_thresholds(0.0, 0.9), (0.8, 0.9));
        assert_eq!(validate_thresholds(0.8, 1.5), (0.8, 0.9));
    }

    #[test]
    fn flags() {
        assert!(is_truthy("TRUE"));
        assert!(is_truthy("1"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("nope"));
    }

    #[test]
    fn defaults_enable_every_job() {
        let config = WorkerConfig::default();
        assert!(JobName::ALL.iter().all(|j| config.is_enabled(*j)));
        assert_eq!(config.watchdog_stale_after, Duration::minutes(150));
        assert!(!config.database_url.is_set());
    }
}
