use chrono::{DateTime, Duration, Utc};
use crate::{
    db_types::{MatchField, MatchRecord, MatchStatus, NewMatch},
    traits::MatchStore,
};

pub fn random_match_id() -> String {
    format!("m-{:08x}", rand::random::<u32>())
}

/// A 0-0 match in `status` that kicks off at `kickoff`.
pub fn new_match(match_id: &str, status: MatchStatus, kickoff: DateTime<Utc>) -> NewMatch {
    NewMatch::new(match_id, status)
        .with_field(MatchField::ScoreHome, 0)
        .with_field(MatchField::ScoreAway, 0)
        .with_field(MatchField::KickoffAt, kickoff.to_rfc3339())
}

/// A match that kicked off `minutes_ago` minutes ago and is still 0-0.
pub fn live_match(match_id: &str, minutes_ago: i64) -> NewMatch {
    new_match(match_id, MatchStatus::Live, Utc::now() - Duration::minutes(minutes_ago))
}

pub async fn seed_match<B: MatchStore>(db: &B, new_match: NewMatch) -> MatchRecord {
    db.insert_match(new_match).await.expect("Error seeding match")
}

/// Builds a stored record directly, for backends that accept one (see `MemoryDatabase::put_match`). Lets tests set
/// `updated_at` to any point in time.
pub fn match_record(new_match: NewMatch, updated_at: DateTime<Utc>) -> MatchRecord {
    MatchRecord {
        match_id: new_match.match_id,
        status: new_match.status,
        fields: new_match.fields,
        provenance: Default::default(),
        created_at: updated_at,
        updated_at,
    }
}
