use log::*;

#[cfg(feature = "postgres")]
use crate::PostgresDatabase;

pub fn prepare_test_env() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    debug!("🚀️ Logging initialised");
}

/// Connects to the database named by `LSW_TEST_DATABASE_URL` and runs the migrations. Returns `None` if the variable
/// is not set, so callers can skip gracefully.
#[cfg(feature = "postgres")]
pub async fn prepare_test_database(max_connections: u32) -> Option<PostgresDatabase> {
    prepare_test_env();
    let Ok(url) = std::env::var("LSW_TEST_DATABASE_URL") else {
        warn!("🚀️ LSW_TEST_DATABASE_URL is not set. Skipping Postgres tests.");
        return None;
    };
    let db = PostgresDatabase::new_with_url(&url, max_connections).await.expect("Error creating connection to database");
    db.run_migrations().await.expect("Error running DB migrations");
    info!("🚀️ Test database ready");
    Some(db)
}
