//! # Advisory lock keys
//!
//! Session-scoped advisory locks are requested with a single 64-bit integer key. Keys are partitioned into two
//! disjoint, non-negative ranges:
//!
//! * **Job keys** live in `[JOB_LOCK_BASE, JOB_LOCK_BASE + JobName::ALL.len())`. Every job type has a fixed
//!   constant, and since [`JobName`] is a closed enum, there is no way to ask for the key of a job that does not
//!   exist.
//! * **Match keys** live in `[MATCH_LOCK_BASE, MATCH_LOCK_BASE + MATCH_LOCK_RANGE)`. A match identifier is hashed
//!   into this range. Two distinct identifiers can land on the same slot; the only consequence is that the two
//!   matches briefly serialise each other's updates.
//!
//! The match hash must stay bit-for-bit stable. Sibling instances compute keys independently and compare them
//! through the database, so changing the hash is a breaking change for a running fleet.
use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::db_types::ConversionError;

pub const JOB_LOCK_BASE: i64 = 7_000_000;
pub const MATCH_LOCK_BASE: i64 = 1 << 40;
pub const MATCH_LOCK_RANGE: i64 = 1 << 40;

const HASH_SEED: u64 = 5381;
const HASH_MULTIPLIER: u64 = 33;

//--------------------------------------       LockKey         ---------------------------------------------------------
/// A non-negative 63-bit advisory lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(i64);

impl LockKey {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_job_key(&self) -> bool {
        (JOB_LOCK_BASE..JOB_LOCK_BASE + JobName::ALL.len() as i64).contains(&self.0)
    }

    pub fn is_match_key(&self) -> bool {
        (MATCH_LOCK_BASE..MATCH_LOCK_BASE + MATCH_LOCK_RANGE).contains(&self.0)
    }
}

impl Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_job_key() {
            write!(f, "job-lock:{}", self.0)
        } else {
            write!(f, "match-lock:{}", self.0)
        }
    }
}

//--------------------------------------       JobName         ---------------------------------------------------------
/// Every background job the fleet knows about. Adding a job means adding a variant here, which in turn forces a
/// lock key to be assigned in [`JobName::lock_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobName {
    LiveScoreIngest,
    FixtureSync,
    StuckMatchWatchdog,
    MinuteEngine,
    PredictionSettlement,
    PoolHealth,
    JobHistoryRetention,
}

impl JobName {
    pub const ALL: [JobName; 7] = [
        JobName::LiveScoreIngest,
        JobName::FixtureSync,
        JobName::StuckMatchWatchdog,
        JobName::MinuteEngine,
        JobName::PredictionSettlement,
        JobName::PoolHealth,
        JobName::JobHistoryRetention,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::LiveScoreIngest => "live_score_ingest",
            JobName::FixtureSync => "fixture_sync",
            JobName::StuckMatchWatchdog => "stuck_match_watchdog",
            JobName::MinuteEngine => "minute_engine",
            JobName::PredictionSettlement => "prediction_settlement",
            JobName::PoolHealth => "pool_health",
            JobName::JobHistoryRetention => "job_history_retention",
        }
    }

    /// The fixed advisory lock key for this job. Offsets are part of the fleet-wide contract: never renumber an
    /// existing job, only append.
    pub fn lock_key(&self) -> LockKey {
        let offset = match self {
            JobName::LiveScoreIngest => 0,
            JobName::FixtureSync => 1,
            JobName::StuckMatchWatchdog => 2,
            JobName::MinuteEngine => 3,
            JobName::PredictionSettlement => 4,
            JobName::PoolHealth => 5,
            JobName::JobHistoryRetention => 6,
        };
        LockKey(JOB_LOCK_BASE + offset)
    }
}

impl Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobName {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobName::ALL
            .iter()
            .find(|job| job.as_str() == s.trim())
            .copied()
            .ok_or_else(|| ConversionError(format!("Unknown job name: {s}")))
    }
}

//--------------------------------------      Match keys       ---------------------------------------------------------
/// Returns `None` for missing, empty or whitespace-only identifiers. Anything else is returned unchanged, byte for
/// byte. Identifiers are never trimmed.
pub fn normalize_identifier(identifier: Option<&str>) -> Option<&str> {
    identifier.filter(|s| !s.trim().is_empty())
}

/// Derives the advisory lock key for a match identifier.
///
/// Returns `None` for missing or blank identifiers; callers must skip locking in that case rather than fail.
pub fn match_lock_key(identifier: Option<&str>) -> Option<LockKey> {
    normalize_identifier(identifier).map(|id| {
        let hash = identifier_hash(id);
        LockKey(MATCH_LOCK_BASE + hash % MATCH_LOCK_RANGE)
    })
}

/// djb2-style rolling hash over the UTF-8 bytes, truncated to 63 bits.
fn identifier_hash(identifier: &str) -> i64 {
    let hash = identifier
        .bytes()
        .fold(HASH_SEED, |h, b| h.wrapping_mul(HASH_MULTIPLIER).wrapping_add(u64::from(b)));
    (hash & i64::MAX as u64) as i64
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn blank_identifiers_have_no_key() {
        assert_eq!(match_lock_key(None), None);
        assert_eq!(match_lock_key(Some("")), None);
        assert_eq!(match_lock_key(Some("   ")), None);
    }

    #[test]
    fn surrounding_whitespace_is_hashed() {
        // 5381 * 33 + ' ' = 177605; 177605 * 33 + 'm' = 5861074; 5861074 * 33 + '1' = 193415491
        let padded = match_lock_key(Some(" m1")).unwrap();
        assert_eq!(padded.value(), MATCH_LOCK_BASE + 193_415_491);
        assert_eq!(normalize_identifier(Some(" m1")), Some(" m1"));
        assert_eq!(normalize_identifier(Some(" \t")), None);
    }

    #[test]
    fn match_keys_are_deterministic() {
        // 5381 * 33 + 'm' = 177682; 177682 * 33 + '1' = 5863555
        let key = match_lock_key(Some("m1")).unwrap();
        assert_eq!(key.value(), MATCH_LOCK_BASE + 5_863_555);
        assert_eq!(match_lock_key(Some("m1")), Some(key));
        assert_ne!(match_lock_key(Some(" m1 ")), Some(key));
        assert!(key.is_match_key());
        assert!(!key.is_job_key());
    }

    #[test]
    fn long_identifiers_stay_in_range() {
        let id = "sr:sport_event:".repeat(40) + "49283716";
        let key = match_lock_key(Some(&id)).unwrap();
        assert!(key.value() >= 0);
        assert!(key.is_match_key());
        let unicode = match_lock_key(Some("Bayern München vs. Atlético")).unwrap();
        assert!(unicode.is_match_key());
    }

    #[test]
    fn job_keys_are_unique_and_disjoint_from_match_keys() {
        let keys = JobName::ALL.iter().map(|j| j.lock_key()).collect::<HashSet<_>>();
        assert_eq!(keys.len(), JobName::ALL.len());
        for key in keys {
            assert!(key.is_job_key());
            assert!(!key.is_match_key());
        }
    }

    #[test]
    fn job_names_round_trip_through_strings() {
        for job in JobName::ALL {
            assert_eq!(job.as_str().parse::<JobName>().unwrap(), job);
        }
        assert!("not_a_job".parse::<JobName>().is_err());
    }
}
