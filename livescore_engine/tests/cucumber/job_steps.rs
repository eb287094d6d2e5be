use std::{
    sync::atomic::Ordering,
    time::Duration,
};

use cucumber::{given, then, when};
use futures_util::future::join;
use livescore_engine::{
    lock_keys::JobName,
    JobContext,
    JobError,
    JobExecutionLog,
    JobOptions,
    SessionLockDatabase,
};

use crate::cucumber::LiveScoreWorld;

fn job(name: &str) -> JobName {
    name.parse::<JobName>().expect("Unknown job")
}

#[given(expr = "another instance holds the lock for the {word} job")]
async fn foreign_job_lock(world: &mut LiveScoreWorld, name: String) {
    let mut session = world.db.checkout().await.expect("Error checking out a connection");
    assert!(world.db.try_advisory_lock(&mut session, job(&name).lock_key()).await.expect("Error locking"));
    world.foreign_sessions.push(session);
}

#[when(expr = "the {word} job fires twice at the same time")]
async fn fire_twice(world: &mut LiveScoreWorld, name: String) {
    let options = JobOptions::new(job(&name));
    let calls = world.work_calls.clone();
    let work = |_ctx: JobContext| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<(), JobError>(())
        }
    };
    let (a, b) = join(world.runner.run(&options, work), world.runner.run(&options, work)).await;
    world.job_outcomes.push(a);
    world.job_outcomes.push(b);
}

#[when(expr = "the {word} job fires")]
async fn fire(world: &mut LiveScoreWorld, name: String) {
    let options = JobOptions::new(job(&name));
    let calls = world.work_calls.clone();
    let outcome = world
        .runner
        .run(&options, |_ctx| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    world.job_outcomes.push(outcome);
}

#[when(expr = "the {word} job fires with a {int}ms timeout and takes {int}ms")]
async fn fire_slow(world: &mut LiveScoreWorld, name: String, timeout: u64, takes: u64) {
    let options = JobOptions::new(job(&name)).with_timeout(Duration::from_millis(timeout));
    let outcome = world
        .runner
        .run(&options, |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(takes)).await;
            Ok(())
        })
        .await;
    world.job_outcomes.push(outcome);
}

#[then(expr = "the job work ran {int} time(s)")]
async fn check_work_calls(world: &mut LiveScoreWorld, expected: usize) {
    assert_eq!(world.work_calls.load(Ordering::SeqCst), expected);
}

#[then(expr = "one firing was '{word}'")]
async fn check_one_outcome(world: &mut LiveScoreWorld, outcome: String) {
    assert_eq!(world.job_outcomes.iter().filter(|o| o.as_str() == outcome).count(), 1);
}

#[then(expr = "the last firing was '{word}'")]
async fn check_last_outcome(world: &mut LiveScoreWorld, outcome: String) {
    assert_eq!(world.last_outcome().as_str(), outcome);
}

#[then(expr = "the {word} job history shows '{word}'")]
async fn check_history(world: &mut LiveScoreWorld, name: String, status: String) {
    let history = world.db.fetch_job_executions(job(&name), 1).await.expect("Error fetching history");
    assert_eq!(history.first().map(|r| r.status.as_str()), Some(status.as_str()));
}
