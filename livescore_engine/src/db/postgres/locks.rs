//! Advisory lock primitives. Both must be issued on the connection that owns (or is to own) the lock.
use sqlx::PgConnection;

use crate::lock_keys::LockKey;

pub async fn try_advisory_lock(key: LockKey, conn: &mut PgConnection) -> Result<bool, sqlx::Error> {
    let (locked,): (bool,) =
        sqlx::query_as("SELECT pg_try_advisory_lock($1)").bind(key.value()).fetch_one(conn).await?;
    Ok(locked)
}

/// Returns `false` (and Postgres logs a warning) if this connection did not hold the lock.
pub async fn advisory_unlock(key: LockKey, conn: &mut PgConnection) -> Result<bool, sqlx::Error> {
    let (unlocked,): (bool,) =
        sqlx::query_as("SELECT pg_advisory_unlock($1)").bind(key.value()).fetch_one(conn).await?;
    Ok(unlocked)
}
