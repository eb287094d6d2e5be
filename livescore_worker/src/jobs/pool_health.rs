use livescore_engine::{pool_health::PoolHealth, traits::PoolStats, JobContext, JobError, PoolHealthMonitor};
use log::*;

/// Samples this instance's connection pool. Each instance has its own pool, so this job runs everywhere and never
/// takes the fleet-wide job lock.
#[derive(Debug)]
pub struct PoolHealthJob<P> {
    monitor: PoolHealthMonitor<P>,
}

impl<P: PoolStats> PoolHealthJob<P> {
    pub fn new(monitor: PoolHealthMonitor<P>) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> &PoolHealthMonitor<P> {
        &self.monitor
    }

    pub async fn run(&self, _ctx: JobContext) -> Result<(), JobError> {
        let report = self.monitor.sample();
        match report.health {
            PoolHealth::Healthy => debug!("🩺️ Pool healthy at {:.0}%", report.utilization * 100.0),
            health => info!("🩺️ Pool {health} at {:.0}%", report.utilization * 100.0),
        }
        Ok(())
    }
}
