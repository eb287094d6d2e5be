//! # Postgres backend
//!
//! Session-scoped locks map onto Postgres advisory locks (`pg_try_advisory_lock` / `pg_advisory_unlock`), which
//! belong to the backend process serving one physical connection.
//!
//! The low-level functions in [`locks`], [`matches`] and [`job_executions`] are plain functions that accept a
//! `&mut PgConnection`. Callers pick the connection: a pooled one, a transaction (pass `&mut tx`), or, for lock
//! primitives, the connection leased by a [`crate::session_lock::SessionLock`].
use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod job_executions;
pub mod locks;
pub mod matches;
mod postgres_impl;

pub use postgres_impl::{PgSession, PostgresDatabase};

pub async fn new_pool(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new().max_connections(max_connections).acquire_timeout(acquire_timeout).connect(url).await?;
    Ok(pool)
}
