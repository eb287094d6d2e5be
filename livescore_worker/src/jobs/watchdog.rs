use chrono::{DateTime, Duration, Utc};
use livescore_engine::{
    db_types::{FieldUpdate, MatchField, MatchRecord, MatchStatus},
    source::Source,
    JobContext,
    JobError,
    MatchOrchestrator,
    MatchStore,
    UpdateStatus,
};
use log::*;

/// Ends matches that are still marked as in play long after anyone last touched them, usually because the feed that
/// should have ended them went quiet.
#[derive(Debug, Clone)]
pub struct StuckMatchWatchdog<B> {
    orchestrator: MatchOrchestrator<B>,
    stale_after: Duration,
}

impl<B: MatchStore> StuckMatchWatchdog<B> {
    pub fn new(orchestrator: MatchOrchestrator<B>, stale_after: Duration) -> Self {
        Self { orchestrator, stale_after }
    }

    pub async fn run(&self, ctx: JobContext) -> Result<(), JobError> {
        let now = Utc::now();
        let in_play = self.orchestrator.db().fetch_matches_with_status(&MatchStatus::IN_PLAY).await?;
        let stuck = in_play.iter().filter(|m| is_stuck(m, now, self.stale_after)).collect::<Vec<_>>();
        if stuck.is_empty() {
            debug!("🕰️ No stuck matches among {} in play", in_play.len());
            ctx.set_rows_affected(0);
            return Ok(());
        }
        info!("🕰️ {} of {} matches in play look stuck", stuck.len(), in_play.len());
        let mut ended = 0u64;
        let mut failed = 0usize;
        for record in &stuck {
            if ctx.is_cancelled() {
                ctx.set_rows_affected(ended);
                return Err(JobError::Cancelled);
            }
            let id = record.match_id.as_str();
            if let Some(holder) = status_held_above_watchdog(record) {
                info!("🕰️ Match {id} looks stuck but its status was set by {holder}. Leaving it alone.");
                continue;
            }
            let updates = vec![
                FieldUpdate::new(MatchField::Status, MatchStatus::Ended.as_str(), Source::Watchdog).with_timestamp(now),
                FieldUpdate::new(MatchField::EndedAt, now.to_rfc3339(), Source::Watchdog).with_timestamp(now),
            ];
            match self.orchestrator.update_match(Some(id), updates, Source::Watchdog).await {
                Ok(result) if result.changed_fields.contains(&MatchField::Status) => {
                    info!("🕰️ Ended stuck match {id}. Last update was at {}", record.updated_at);
                    ended += 1;
                },
                Ok(result) if result.status == UpdateStatus::Success => {
                    info!("🕰️ Match {id} looks stuck but its status is held by a higher priority writer");
                },
                Ok(result) => debug!("🕰️ Could not end match {id} this time ({})", result.status.as_str()),
                Err(e) => {
                    warn!("🕰️ Could not end stuck match {id}. {e}");
                    failed += 1;
                },
            }
        }
        ctx.set_rows_affected(ended);
        if failed > 0 {
            return Err(JobError::Other(format!("{failed} of {} stuck matches could not be ended", stuck.len())));
        }
        Ok(())
    }
}

fn status_held_above_watchdog(record: &MatchRecord) -> Option<Source> {
    record
        .provenance(MatchField::Status)
        .filter(|p| p.priority > Source::Watchdog.priority())
        .map(|p| p.source)
}

/// A match is stuck when it is in play, has not been updated for `stale_after`, and kicked off at least
/// `stale_after` ago. Matches without a kickoff time are never considered stuck.
pub fn is_stuck(record: &MatchRecord, now: DateTime<Utc>, stale_after: Duration) -> bool {
    MatchStatus::IN_PLAY.contains(&record.status)
        && now - record.updated_at >= stale_after
        && record.timestamp(MatchField::KickoffAt).is_some_and(|kickoff| now - kickoff >= stale_after)
}
