use std::sync::Arc;

use chrono::{Duration, Utc};
use futures_util::future::join;
use livescore_engine::{
    db_types::{FieldUpdate, MatchField, MatchStatus},
    metrics::RecordingMetrics,
    source::Source,
    test_utils::{
        fixtures::{new_match, random_match_id},
        prepare_env::prepare_test_env,
    },
    MatchOrchestrator,
    MatchStore,
    MemoryDatabase,
    UpdateResult,
    UpdateStatus,
};

async fn setup() -> (MatchOrchestrator<MemoryDatabase>, String) {
    prepare_test_env();
    let db = MemoryDatabase::new(8);
    let id = random_match_id();
    db.insert_match(new_match(&id, MatchStatus::Live, Utc::now() - Duration::minutes(20))).await.unwrap();
    (MatchOrchestrator::new(db, Arc::new(RecordingMetrics::new())), id)
}

/// Retries while another writer holds the match lock, as the ingestion callers do.
async fn update_with_retry(
    orchestrator: &MatchOrchestrator<MemoryDatabase>,
    id: &str,
    update: FieldUpdate,
) -> UpdateResult {
    let source = update.source;
    loop {
        let result = orchestrator.update_match(Some(id), vec![update.clone()], source).await.unwrap();
        if result.status != UpdateStatus::RejectedLocked {
            return result;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn lower_priority_never_overwrites_in_any_order() {
    let t0 = Utc::now();
    let proposals = [
        FieldUpdate::new(MatchField::ScoreHome, 5, Source::Unknown).with_timestamp(t0 + Duration::seconds(30)),
        FieldUpdate::new(MatchField::ScoreHome, 4, Source::Computed).with_timestamp(t0 + Duration::seconds(20)),
        FieldUpdate::new(MatchField::ScoreHome, 3, Source::Api).with_timestamp(t0 + Duration::seconds(10)),
        FieldUpdate::new(MatchField::ScoreHome, 2, Source::Admin).with_timestamp(t0),
    ];
    let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];
    for order in orders {
        let (orchestrator, id) = setup().await;
        for i in order {
            let update = proposals[i].clone();
            let source = update.source;
            let result = orchestrator.update_match(Some(&id), vec![update], source).await.unwrap();
            assert_eq!(result.status, UpdateStatus::Success);
        }
        let stored = orchestrator.fetch_match(&id).await.unwrap().unwrap();
        assert_eq!(stored.integer(MatchField::ScoreHome), Some(2), "order {order:?}");
        assert_eq!(stored.provenance(MatchField::ScoreHome).unwrap().source, Source::Admin);
    }
}

#[tokio::test]
async fn terminal_matches_reject_everything() {
    let (orchestrator, id) = setup().await;
    let end = vec![
        FieldUpdate::new(MatchField::Status, "ended", Source::Admin),
        FieldUpdate::new(MatchField::EndedAt, Utc::now().to_rfc3339(), Source::Admin),
    ];
    let result = orchestrator.update_match(Some(&id), end, Source::Admin).await.unwrap();
    assert_eq!(result.status, UpdateStatus::Success);
    assert_eq!(result.changed_fields, vec![MatchField::Status, MatchField::EndedAt]);
    let before = orchestrator.fetch_match(&id).await.unwrap().unwrap();

    for source in Source::ALL {
        let updates = vec![
            FieldUpdate::new(MatchField::Status, "live", source),
            FieldUpdate::new(MatchField::ScoreHome, 9, source),
        ];
        let result = orchestrator.update_match(Some(&id), updates, source).await.unwrap();
        assert_eq!(result.status, UpdateStatus::RejectedImmutable, "source {source}");
        assert!(result.changed_fields.is_empty());
    }
    let after = orchestrator.fetch_match(&id).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn concurrent_api_and_watchdog_scores_resolve_to_the_watchdog() {
    for watchdog_first in [true, false] {
        let (orchestrator, id) = setup().await;
        let api = FieldUpdate::new(MatchField::ScoreHome, 2, Source::Api);
        let watchdog = FieldUpdate::new(MatchField::ScoreHome, 1, Source::Watchdog);
        let (a, b) = if watchdog_first {
            let (w, a) = join(
                update_with_retry(&orchestrator, &id, watchdog),
                update_with_retry(&orchestrator, &id, api),
            )
            .await;
            (a, w)
        } else {
            join(update_with_retry(&orchestrator, &id, api), update_with_retry(&orchestrator, &id, watchdog)).await
        };
        assert_eq!(a.status, UpdateStatus::Success);
        assert_eq!(b.status, UpdateStatus::Success);
        let stored = orchestrator.fetch_match(&id).await.unwrap().unwrap();
        assert_eq!(stored.integer(MatchField::ScoreHome), Some(1), "watchdog first: {watchdog_first}");
    }
}

#[tokio::test]
async fn status_updates_move_the_record_status() {
    let (orchestrator, id) = setup().await;
    let halftime = vec![FieldUpdate::new(MatchField::Status, "HALFTIME", Source::Api)];
    let result = orchestrator.update_match(Some(&id), halftime, Source::Api).await.unwrap();
    assert_eq!(result.changed_fields, vec![MatchField::Status]);
    let stored = orchestrator.fetch_match(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, MatchStatus::Halftime);
    assert_eq!(stored.value(MatchField::Status).and_then(|v| v.as_str()), Some("halftime"));
    let live = orchestrator.db().fetch_matches_with_status(&MatchStatus::IN_PLAY).await.unwrap();
    assert_eq!(live.len(), 1);
}
