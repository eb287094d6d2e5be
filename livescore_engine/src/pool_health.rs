//! Connection pool utilisation sampling.
//!
//! Every session-scoped lock pins a pooled connection for the length of its critical section, so pool exhaustion is
//! the first symptom of a stuck job or a slow database. [`PoolHealthMonitor::sample`] publishes `db.pool.*` gauges
//! on every call and raises log alerts, each kind at most once per `alert_interval`.
use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use log::*;

use crate::{
    metrics::MetricsSink,
    traits::{PoolSnapshot, PoolStats},
};

#[derive(Debug, Clone, PartialEq)]
pub struct PoolHealthConfig {
    pub warn_threshold: f64,
    pub critical_threshold: f64,
    pub alert_interval: Duration,
}

impl Default for PoolHealthConfig {
    fn default() -> Self {
        Self { warn_threshold: 0.8, critical_threshold: 0.9, alert_interval: Duration::from_secs(60) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PoolHealth {
    Healthy,
    Warning,
    Critical,
}

impl Display for PoolHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolHealth::Healthy => write!(f, "healthy"),
            PoolHealth::Warning => write!(f, "warning"),
            PoolHealth::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    HighUtilization,
    CriticalUtilization,
    Waiters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolReport {
    pub snapshot: PoolSnapshot,
    pub active: u32,
    pub utilization: f64,
    pub health: PoolHealth,
    /// Alerts that were logged by this sample. Rate-limited alerts are not included.
    pub alerts: Vec<AlertKind>,
}

pub struct PoolHealthMonitor<P> {
    pool: P,
    config: PoolHealthConfig,
    metrics: Arc<dyn MetricsSink>,
    last_alerts: Mutex<HashMap<AlertKind, Instant>>,
}

impl<P> std::fmt::Debug for PoolHealthMonitor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PoolHealthMonitor ({:?})", self.config)
    }
}

impl<P: PoolStats> PoolHealthMonitor<P> {
    pub fn new(pool: P, config: PoolHealthConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { pool, config, metrics, last_alerts: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> &PoolHealthConfig {
        &self.config
    }

    pub fn sample(&self) -> PoolReport {
        self.sample_at(Instant::now())
    }

    /// As [`Self::sample`], with an explicit clock for the alert rate limiter.
    pub fn sample_at(&self, now: Instant) -> PoolReport {
        let snapshot = self.pool.pool_snapshot();
        let active = snapshot.active();
        let utilization = snapshot.utilization();
        self.metrics.gauge("db.pool.total", f64::from(snapshot.total), &[]);
        self.metrics.gauge("db.pool.idle", f64::from(snapshot.idle), &[]);
        self.metrics.gauge("db.pool.active", f64::from(active), &[]);
        self.metrics.gauge("db.pool.waiting", f64::from(snapshot.waiting), &[]);
        self.metrics.gauge("db.pool.utilization", utilization, &[]);

        let health = if utilization >= self.config.critical_threshold {
            PoolHealth::Critical
        } else if utilization >= self.config.warn_threshold {
            PoolHealth::Warning
        } else {
            PoolHealth::Healthy
        };
        let percent = utilization * 100.0;
        let mut alerts = Vec::new();
        match health {
            PoolHealth::Critical if self.should_alert(AlertKind::CriticalUtilization, now) => {
                error!(
                    "🩺️ Connection pool is at {percent:.0}% ({active}/{} active, {} waiting)",
                    snapshot.max_connections, snapshot.waiting
                );
                alerts.push(AlertKind::CriticalUtilization);
            },
            PoolHealth::Warning if self.should_alert(AlertKind::HighUtilization, now) => {
                warn!("🩺️ Connection pool is at {percent:.0}% ({active}/{} active)", snapshot.max_connections);
                alerts.push(AlertKind::HighUtilization);
            },
            _ => {},
        }
        if snapshot.waiting > 0 && self.should_alert(AlertKind::Waiters, now) {
            warn!("🩺️ {} callers are waiting for a database connection", snapshot.waiting);
            alerts.push(AlertKind::Waiters);
        }
        trace!("🩺️ Pool {health}: {snapshot:?}");
        PoolReport { snapshot, active, utilization, health, alerts }
    }

    fn should_alert(&self, kind: AlertKind, now: Instant) -> bool {
        let mut last = self.last_alerts.lock().unwrap_or_else(|e| e.into_inner());
        match last.get(&kind) {
            Some(at) if now.saturating_duration_since(*at) < self.config.alert_interval => false,
            _ => {
                last.insert(kind, now);
                true
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::RecordingMetrics;

    #[derive(Clone)]
    struct FixedPool(Arc<Mutex<PoolSnapshot>>);

    impl FixedPool {
        fn new(total: u32, idle: u32, waiting: u32) -> Self {
            Self(Arc::new(Mutex::new(PoolSnapshot { total, idle, waiting, max_connections: 10 })))
        }

        fn set(&self, total: u32, idle: u32, waiting: u32) {
            *self.0.lock().unwrap() = PoolSnapshot { total, idle, waiting, max_connections: 10 };
        }
    }

    impl PoolStats for FixedPool {
        fn pool_snapshot(&self) -> PoolSnapshot {
            *self.0.lock().unwrap()
        }
    }

    fn monitor(pool: &FixedPool, metrics: &RecordingMetrics) -> PoolHealthMonitor<FixedPool> {
        PoolHealthMonitor::new(pool.clone(), PoolHealthConfig::default(), Arc::new(metrics.clone()))
    }

    #[test]
    fn gauges_are_published_every_sample() {
        let pool = FixedPool::new(6, 2, 0);
        let metrics = RecordingMetrics::new();
        let report = monitor(&pool, &metrics).sample();
        assert_eq!(report.health, PoolHealth::Healthy);
        assert_eq!(report.active, 4);
        assert!(report.alerts.is_empty());
        assert_eq!(metrics.last_gauge("db.pool.total"), Some(6.0));
        assert_eq!(metrics.last_gauge("db.pool.idle"), Some(2.0));
        assert_eq!(metrics.last_gauge("db.pool.active"), Some(4.0));
        assert_eq!(metrics.last_gauge("db.pool.waiting"), Some(0.0));
        assert_eq!(metrics.last_gauge("db.pool.utilization"), Some(0.4));
    }

    #[test]
    fn thresholds() {
        let pool = FixedPool::new(8, 0, 0);
        let metrics = RecordingMetrics::new();
        let monitor = monitor(&pool, &metrics);
        let report = monitor.sample();
        assert_eq!(report.health, PoolHealth::Warning);
        assert_eq!(report.alerts, vec![AlertKind::HighUtilization]);
        pool.set(10, 0, 3);
        let report = monitor.sample();
        assert_eq!(report.health, PoolHealth::Critical);
        assert_eq!(report.alerts, vec![AlertKind::CriticalUtilization, AlertKind::Waiters]);
    }

    #[test]
    fn alerts_are_rate_limited_per_kind() {
        let pool = FixedPool::new(10, 0, 1);
        let metrics = RecordingMetrics::new();
        let monitor = monitor(&pool, &metrics);
        let t0 = Instant::now();
        assert_eq!(monitor.sample_at(t0).alerts.len(), 2);
        let report = monitor.sample_at(t0 + Duration::from_secs(30));
        assert_eq!(report.health, PoolHealth::Critical);
        assert!(report.alerts.is_empty());
        // Gauges are never rate-limited
        assert_eq!(metrics.count("db.pool.utilization", &[]), 2);
        let report = monitor.sample_at(t0 + Duration::from_secs(61));
        assert_eq!(report.alerts, vec![AlertKind::CriticalUtilization, AlertKind::Waiters]);
    }
}
