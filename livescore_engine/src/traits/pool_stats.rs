/// Point-in-time connection pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSnapshot {
    /// Open connections, idle or checked out.
    pub total: u32,
    pub idle: u32,
    /// Callers currently blocked on a connection: they found the pool full with nothing idle. Leases that are served
    /// straight away are never counted. The check and the lease are not atomic, so this is a close approximation.
    pub waiting: u32,
    pub max_connections: u32,
}

impl PoolSnapshot {
    pub fn active(&self) -> u32 {
        self.total.saturating_sub(self.idle)
    }

    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        f64::from(self.active()) / f64::from(self.max_connections)
    }
}

pub trait PoolStats {
    fn pool_snapshot(&self) -> PoolSnapshot;
}
