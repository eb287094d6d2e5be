use chrono::{Duration, Utc};
use cucumber::{given, then, when};
use livescore_engine::{
    db_types::{FieldUpdate, MatchField, MatchStatus},
    lock_keys::{match_lock_key, MATCH_LOCK_BASE, MATCH_LOCK_RANGE},
    source::Source,
    test_utils::fixtures::new_match,
    MatchStore,
    SessionLockDatabase,
};
use serde_json::Value;

use crate::cucumber::LiveScoreWorld;

#[given(expr = "a live match '{word}'")]
async fn live_match(world: &mut LiveScoreWorld, match_id: String) {
    let kickoff = Utc::now() - Duration::minutes(30);
    world.db.insert_match(new_match(&match_id, MatchStatus::Live, kickoff)).await.expect("Error inserting match");
}

#[given(expr = "another writer holds the lock for match '{word}'")]
async fn foreign_match_lock(world: &mut LiveScoreWorld, match_id: String) {
    let key = match_lock_key(Some(&match_id)).expect("No lock key");
    let mut session = world.db.checkout().await.expect("Error checking out a connection");
    assert!(world.db.try_advisory_lock(&mut session, key).await.expect("Error locking"));
    world.foreign_sessions.push(session);
}

//             admin sets status of match 'm1' to ended
#[when(expr = "{word} sets {word} of match '{word}' to {word}")]
async fn propose_update(world: &mut LiveScoreWorld, source: String, field: String, match_id: String, value: String) {
    let source = source.parse::<Source>().unwrap();
    let field = field.parse::<MatchField>().expect("Unknown field");
    // Numbers go in as numbers, everything else as a string
    let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
    let update = FieldUpdate::new(field, value, source);
    let result = world.orchestrator.update_match(Some(&match_id), vec![update], source).await.expect("Update failed");
    world.last_update = Some(result);
}

#[when(expr = "{word} sends an update without a match id")]
async fn update_without_id(world: &mut LiveScoreWorld, source: String) {
    let source = source.parse::<Source>().unwrap();
    let update = FieldUpdate::new(MatchField::ScoreHome, 1, source);
    let result = world.orchestrator.update_match(None, vec![update], source).await.expect("Update failed");
    world.last_update = Some(result);
}

#[then(expr = "the update status is '{word}'")]
async fn check_update_status(world: &mut LiveScoreWorld, status: String) {
    assert_eq!(world.last_update().status.as_str(), status);
}

#[then(expr = "match '{word}' has {word} {word}")]
async fn check_field(world: &mut LiveScoreWorld, match_id: String, field: String, expected: String) {
    let field = field.parse::<MatchField>().expect("Unknown field");
    let record = world.db.fetch_match(&match_id).await.expect("Error fetching match").expect("Match does not exist");
    let expected = serde_json::from_str::<Value>(&expected).unwrap_or(Value::String(expected));
    assert_eq!(record.value(field), Some(&expected), "{field} on match {match_id}");
}

#[when(expr = "I compute the lock key for match '{word}' twice")]
async fn compute_key_twice(world: &mut LiveScoreWorld, match_id: String) {
    world.lock_keys.push(match_lock_key(Some(&match_id)));
    world.lock_keys.push(match_lock_key(Some(&match_id)));
}

#[when("I compute the lock key for an empty match id")]
async fn compute_empty_key(world: &mut LiveScoreWorld) {
    world.lock_keys.push(match_lock_key(Some("")));
}

#[when("I compute the lock key for a missing match id")]
async fn compute_missing_key(world: &mut LiveScoreWorld) {
    world.lock_keys.push(match_lock_key(None));
}

#[then("the lock keys are equal and in the match range")]
async fn check_keys_equal(world: &mut LiveScoreWorld) {
    let first = world.lock_keys[0].expect("No lock key");
    assert!(world.lock_keys.iter().all(|k| *k == Some(first)));
    assert!((MATCH_LOCK_BASE..MATCH_LOCK_BASE + MATCH_LOCK_RANGE).contains(&first.value()));
}

#[then("there is no lock key")]
async fn check_no_key(world: &mut LiveScoreWorld) {
    assert_eq!(world.lock_keys.last().copied().flatten(), None);
}
