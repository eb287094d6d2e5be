//! Runs against a real Postgres server. Set `LSW_TEST_DATABASE_URL` and run with `cargo test -- --ignored`.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use livescore_engine::{
    db_types::{FieldUpdate, MatchField, MatchStatus},
    lock_keys::{match_lock_key, JobName},
    metrics::RecordingMetrics,
    source::Source,
    test_utils::{
        fixtures::{new_match, random_match_id},
        prepare_env::prepare_test_env,
    },
    with_lock,
    JobExecutionLog,
    JobOptions,
    JobRunner,
    MatchOrchestrator,
    MatchStore,
    PostgresDatabase,
    SessionLock,
    SessionLockDatabase,
    StoreError,
    UpdateStatus,
};

async fn database() -> PostgresDatabase {
    prepare_test_env();
    let url = std::env::var("LSW_TEST_DATABASE_URL").expect("LSW_TEST_DATABASE_URL must be set");
    let db = PostgresDatabase::with_acquire_timeout(&url, 5, Duration::from_secs(5)).await.expect("connect");
    db.run_migrations().await.expect("migrations");
    db
}

#[tokio::test]
#[ignore]
async fn advisory_locks_are_session_scoped() {
    let db = database().await;
    let key = match_lock_key(Some(&random_match_id())).unwrap();
    let held = SessionLock::try_acquire(&db, key).await.unwrap().expect("first lock");
    assert!(SessionLock::try_acquire(&db, key).await.unwrap().is_none());
    // Unlocking from a different connection does nothing
    let mut other = db.checkout().await.unwrap();
    assert!(!db.advisory_unlock(&mut other, key).await.unwrap());
    drop(other);
    held.release().await.unwrap();
    let outcome = with_lock(&db, key, async |_session| Ok::<_, StoreError>(())).await.unwrap();
    assert!(!outcome.is_busy());
}

#[tokio::test]
#[ignore]
async fn dropped_guards_close_their_connection() {
    let db = database().await;
    let key = match_lock_key(Some(&random_match_id())).unwrap();
    let held = SessionLock::try_acquire(&db, key).await.unwrap().expect("lock");
    drop(held);
    // The close is asynchronous; give the server a moment to end the session
    let mut acquired = false;
    for _ in 0..50 {
        if let Some(lock) = SessionLock::try_acquire(&db, key).await.unwrap() {
            lock.release().await.unwrap();
            acquired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(acquired);
}

#[tokio::test]
#[ignore]
async fn orchestrator_round_trip() {
    let db = database().await;
    let id = random_match_id();
    db.insert_match(new_match(&id, MatchStatus::Live, Utc::now())).await.unwrap();
    let orchestrator = MatchOrchestrator::new(db.clone(), Arc::new(RecordingMetrics::new()));
    let update = vec![FieldUpdate::new(MatchField::ScoreHome, 1, Source::Watchdog)];
    let result = orchestrator.update_match(Some(&id), update, Source::Watchdog).await.unwrap();
    assert_eq!(result.changed_fields, vec![MatchField::ScoreHome]);
    let update = vec![FieldUpdate::new(MatchField::ScoreHome, 3, Source::Api)];
    let result = orchestrator.update_match(Some(&id), update, Source::Api).await.unwrap();
    assert_eq!(result.status, UpdateStatus::Success);
    assert!(result.changed_fields.is_empty());
    let end = vec![FieldUpdate::new(MatchField::Status, "ended", Source::Admin)];
    orchestrator.update_match(Some(&id), end, Source::Admin).await.unwrap();
    let stored = db.fetch_match(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, MatchStatus::Ended);
    assert_eq!(stored.integer(MatchField::ScoreHome), Some(1));
    assert_eq!(stored.provenance(MatchField::ScoreHome).unwrap().source, Source::Watchdog);
    let relive = vec![FieldUpdate::new(MatchField::Status, "live", Source::Sync)];
    let result = orchestrator.update_match(Some(&id), relive, Source::Sync).await.unwrap();
    assert_eq!(result.status, UpdateStatus::RejectedImmutable);
}

#[tokio::test]
#[ignore]
async fn job_executions_are_recorded() {
    let db = database().await;
    let runner = JobRunner::new(db.clone(), Arc::new(RecordingMetrics::new()));
    let options = JobOptions::new(JobName::JobHistoryRetention);
    let outcome = runner
        .run(&options, |ctx| async move {
            ctx.set_rows_affected(7);
            Ok(())
        })
        .await;
    assert!(outcome.is_success());
    let history = db.fetch_job_executions(JobName::JobHistoryRetention, 1).await.unwrap();
    assert_eq!(history[0].rows_affected, Some(7));
}
