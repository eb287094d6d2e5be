use std::sync::Arc;

use livescore_engine::{metrics::LogMetrics, PostgresDatabase};
use log::*;

use crate::{config::WorkerConfig, errors::WorkerError, scheduler::Scheduler};

/// Connects to the database, brings the schema up to date and runs the job schedule until the process is asked to
/// stop with Ctrl-C.
pub async fn run_worker(config: WorkerConfig) -> Result<(), WorkerError> {
    info!("🚀️ Connecting to {}", config.database_url);
    let db = PostgresDatabase::with_acquire_timeout(
        config.database_url.expose(),
        config.db_max_connections,
        config.db_acquire_timeout,
    )
    .await
    .map_err(|e| WorkerError::InitializeError(format!("Could not connect to the database. {e}")))?;
    if config.skip_migrations {
        info!("🚀️ Skipping database migrations");
    } else {
        db.run_migrations()
            .await
            .map_err(|e| WorkerError::InitializeError(format!("Could not run database migrations. {e}")))?;
        info!("🚀️ Database migrations are up to date");
    }
    let scheduler = Scheduler::from_config(db.clone(), Arc::new(LogMetrics), &config);
    let names = scheduler.job_names().iter().map(|j| j.as_str()).collect::<Vec<&str>>().join(", ");
    info!("🚀️ Worker started. Jobs: {names}");
    scheduler.run_until(shutdown_signal()).await;
    db.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("🚀️ Could not listen for the shutdown signal. {e}. The worker will run until it is killed.");
        std::future::pending::<()>().await;
    }
}
