use chrono::{DateTime, Utc};
use livescore_engine::{
    db_types::{FieldUpdate, MatchField, MatchRecord, MatchStatus},
    source::Source,
    JobContext,
    JobError,
    MatchOrchestrator,
    MatchStore,
};
use log::*;

const HALF_LENGTH: u64 = 45;
const REGULATION_LENGTH: u64 = 90;
const EXTRA_TIME_LENGTH: u64 = 120;

/// Statuses the minute engine looks at.
const CLOCKED: [MatchStatus; 3] = [MatchStatus::Live, MatchStatus::Halftime, MatchStatus::ExtraTime];

/// Keeps the displayed minute of every running match in step with the wall clock.
///
/// Minutes are proposed with [`Source::Computed`], the lowest named priority, so any feed that reports a minute wins
/// over the engine.
#[derive(Debug, Clone)]
pub struct MinuteEngine<B> {
    orchestrator: MatchOrchestrator<B>,
}

impl<B: MatchStore> MinuteEngine<B> {
    pub fn new(orchestrator: MatchOrchestrator<B>) -> Self {
        Self { orchestrator }
    }

    pub async fn run(&self, ctx: JobContext) -> Result<(), JobError> {
        let now = Utc::now();
        let matches = self.orchestrator.db().fetch_matches_with_status(&CLOCKED).await?;
        let mut updated = 0u64;
        for record in &matches {
            if ctx.is_cancelled() {
                ctx.set_rows_affected(updated);
                return Err(JobError::Cancelled);
            }
            let Some(minute) = compute_minute(record, now) else {
                trace!("🕰️ No minute can be computed for match {}", record.match_id);
                continue;
            };
            if record.integer(MatchField::Minute) == i64::try_from(minute).ok() {
                continue;
            }
            let update = vec![FieldUpdate::new(MatchField::Minute, minute, Source::Computed).with_timestamp(now)];
            let result = self.orchestrator.update_match(Some(&record.match_id), update, Source::Computed).await?;
            if result.changed_fields.contains(&MatchField::Minute) {
                updated += 1;
            } else {
                trace!("🕰️ Minute {minute} for match {} not applied ({})", record.match_id, result.status.as_str());
            }
        }
        debug!("🕰️ Minute engine updated {updated} of {} running matches", matches.len());
        ctx.set_rows_affected(updated);
        Ok(())
    }
}

/// The minute a running match should display at `now`, or `None` if it cannot be worked out.
///
/// * Halftime is always 45.
/// * In the first half the clock starts at 1 on kickoff and stops at 45 plus added time.
/// * In the second half the clock starts at 46 and stops at 90 plus added time.
/// * In extra time the second half clock keeps running, from at least 91 up to 120 plus added time.
///
/// Live matches with a `second_half_started_at` are in the second half. Any other status yields `None`, as does a
/// reference time that is missing or in the future.
pub fn compute_minute(record: &MatchRecord, now: DateTime<Utc>) -> Option<u64> {
    let added = record.integer(MatchField::AddedTime).and_then(|a| u64::try_from(a).ok()).unwrap_or(0);
    let second_half = record.timestamp(MatchField::SecondHalfStartedAt);
    match record.status {
        MatchStatus::Halftime => Some(HALF_LENGTH),
        MatchStatus::Live => match second_half {
            Some(started) => {
                elapsed_minutes(started, now).map(|m| (HALF_LENGTH + 1 + m).min(REGULATION_LENGTH + added))
            },
            None => {
                let kickoff = record.timestamp(MatchField::KickoffAt)?;
                elapsed_minutes(kickoff, now).map(|m| (1 + m).min(HALF_LENGTH + added))
            },
        },
        MatchStatus::ExtraTime => elapsed_minutes(second_half?, now)
            .map(|m| (HALF_LENGTH + 1 + m).clamp(REGULATION_LENGTH + 1, EXTRA_TIME_LENGTH + added)),
        _ => None,
    }
}

fn elapsed_minutes(since: DateTime<Utc>, now: DateTime<Utc>) -> Option<u64> {
    u64::try_from((now - since).num_minutes()).ok()
}
