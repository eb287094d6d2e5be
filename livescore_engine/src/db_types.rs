use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{lock_keys::JobName, source::Source};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConversionError(pub String);

//--------------------------------------     MatchStatus       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Halftime,
    ExtraTime,
    Penalties,
    Suspended,
    Postponed,
    /// The match finished normally. Terminal.
    Ended,
    /// Terminal.
    Cancelled,
    /// Terminal.
    Abandoned,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 10] = [
        MatchStatus::Scheduled,
        MatchStatus::Live,
        MatchStatus::Halftime,
        MatchStatus::ExtraTime,
        MatchStatus::Penalties,
        MatchStatus::Suspended,
        MatchStatus::Postponed,
        MatchStatus::Ended,
        MatchStatus::Cancelled,
        MatchStatus::Abandoned,
    ];

    /// Statuses in which the ball is (or is about to be) in play.
    pub const IN_PLAY: [MatchStatus; 4] =
        [MatchStatus::Live, MatchStatus::Halftime, MatchStatus::ExtraTime, MatchStatus::Penalties];

    /// A terminal match is immutable: predictions may already have been settled against it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Ended | MatchStatus::Cancelled | MatchStatus::Abandoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Live => "live",
            MatchStatus::Halftime => "halftime",
            MatchStatus::ExtraTime => "extra_time",
            MatchStatus::Penalties => "penalties",
            MatchStatus::Suspended => "suspended",
            MatchStatus::Postponed => "postponed",
            MatchStatus::Ended => "ended",
            MatchStatus::Cancelled => "cancelled",
            MatchStatus::Abandoned => "abandoned",
        }
    }
}

impl Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        MatchStatus::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| ConversionError(format!("Invalid match status: {s}")))
    }
}

//--------------------------------------      MatchField       ---------------------------------------------------------
/// The fields of a live match record that writers may propose values for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Status,
    ScoreHome,
    ScoreAway,
    Minute,
    AddedTime,
    Period,
    KickoffAt,
    SecondHalfStartedAt,
    EndedAt,
}

impl MatchField {
    pub const ALL: [MatchField; 9] = [
        MatchField::Status,
        MatchField::ScoreHome,
        MatchField::ScoreAway,
        MatchField::Minute,
        MatchField::AddedTime,
        MatchField::Period,
        MatchField::KickoffAt,
        MatchField::SecondHalfStartedAt,
        MatchField::EndedAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchField::Status => "status",
            MatchField::ScoreHome => "score_home",
            MatchField::ScoreAway => "score_away",
            MatchField::Minute => "minute",
            MatchField::AddedTime => "added_time",
            MatchField::Period => "period",
            MatchField::KickoffAt => "kickoff_at",
            MatchField::SecondHalfStartedAt => "second_half_started_at",
            MatchField::EndedAt => "ended_at",
        }
    }

    /// Checks that `value` is acceptable for this field and returns it in canonical form.
    ///
    /// * `status` must be a known status string.
    /// * Scores and the minute must be non-negative integers.
    /// * `added_time` is a non-negative integer or null.
    /// * `period` is a non-empty string or null.
    /// * Timestamps are RFC 3339 strings (stored in UTC) or null.
    pub fn canonical_value(&self, value: &Value) -> Result<Value, ConversionError> {
        let invalid = || ConversionError(format!("Invalid value for {self}: {value}"));
        match self {
            MatchField::Status => {
                let status = value.as_str().ok_or_else(invalid)?.parse::<MatchStatus>()?;
                Ok(Value::from(status.as_str()))
            },
            MatchField::ScoreHome | MatchField::ScoreAway | MatchField::Minute => {
                value.as_u64().map(Value::from).ok_or_else(invalid)
            },
            MatchField::AddedTime => match value {
                Value::Null => Ok(Value::Null),
                v => v.as_u64().map(Value::from).ok_or_else(invalid),
            },
            MatchField::Period => match value {
                Value::Null => Ok(Value::Null),
                Value::String(s) if !s.trim().is_empty() => Ok(Value::from(s.trim())),
                _ => Err(invalid()),
            },
            MatchField::KickoffAt | MatchField::SecondHalfStartedAt | MatchField::EndedAt => match value {
                Value::Null => Ok(Value::Null),
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| Value::from(dt.with_timezone(&Utc).to_rfc3339()))
                    .map_err(|_| invalid()),
                _ => Err(invalid()),
            },
        }
    }
}

impl Display for MatchField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchField {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatchField::ALL
            .iter()
            .find(|field| field.as_str() == s.trim())
            .copied()
            .ok_or_else(|| ConversionError(format!("Unknown match field: {s}")))
    }
}

//--------------------------------------     FieldUpdate       ---------------------------------------------------------
/// One writer's proposed value for one field of a match. There is no priority field: it is always read from the
/// source's table entry, so it cannot be set independently of the source.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field: MatchField,
    pub value: Value,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
}

impl FieldUpdate {
    pub fn new<V: Into<Value>>(field: MatchField, value: V, source: Source) -> Self {
        Self { field, value: value.into(), source, timestamp: Utc::now() }
    }

    pub fn priority(&self) -> u8 {
        self.source.priority()
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

//--------------------------------------   FieldProvenance     ---------------------------------------------------------
/// Who last wrote a field, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub priority: u8,
    pub source: Source,
    pub written_at: DateTime<Utc>,
}

impl From<&FieldUpdate> for FieldProvenance {
    fn from(update: &FieldUpdate) -> Self {
        Self { priority: update.priority(), source: update.source, written_at: update.timestamp }
    }
}

//--------------------------------------     MatchRecord       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub match_id: String,
    pub status: MatchStatus,
    /// Current field values keyed by [`MatchField::as_str`]. The status is mirrored here as well.
    pub fields: Map<String, Value>,
    /// Last successful writer of each field. Fields without an entry have never been written by a prioritised
    /// source and accept any update.
    pub provenance: BTreeMap<MatchField, FieldProvenance>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn is_immutable(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn value(&self, field: MatchField) -> Option<&Value> {
        self.fields.get(field.as_str()).filter(|v| !v.is_null())
    }

    pub fn integer(&self, field: MatchField) -> Option<i64> {
        self.value(field).and_then(Value::as_i64)
    }

    pub fn timestamp(&self, field: MatchField) -> Option<DateTime<Utc>> {
        self.value(field)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn provenance(&self, field: MatchField) -> Option<&FieldProvenance> {
        self.provenance.get(&field)
    }
}

//--------------------------------------       NewMatch        ---------------------------------------------------------
/// A match as created by the fixture importer. Initial values carry no provenance.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub match_id: String,
    pub status: MatchStatus,
    pub fields: Map<String, Value>,
}

impl NewMatch {
    pub fn new<S: Into<String>>(match_id: S, status: MatchStatus) -> Self {
        let mut fields = Map::new();
        fields.insert(MatchField::Status.as_str().to_string(), Value::from(status.as_str()));
        Self { match_id: match_id.into(), status, fields }
    }

    /// Adds an initial field value. Invalid values are logged and ignored. Setting the status this way is ignored;
    /// use [`NewMatch::new`].
    pub fn with_field<V: Into<Value>>(mut self, field: MatchField, value: V) -> Self {
        if field == MatchField::Status {
            return self;
        }
        match field.canonical_value(&value.into()) {
            Ok(v) => {
                self.fields.insert(field.as_str().to_string(), v);
            },
            Err(e) => error!("🗃️ Ignoring initial value for match {}. {e}", self.match_id),
        }
        self
    }
}

//--------------------------------------      JobStatus        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            s => Err(ConversionError(format!("Invalid job status: {s}"))),
        }
    }
}

//--------------------------------------  JobExecutionRecord   ---------------------------------------------------------
/// One row per job run. Observability only; nothing in the locking path reads these.
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecutionRecord {
    pub id: i64,
    pub job_name: JobName,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub duration_ms: Option<i64>,
    pub rows_affected: Option<i64>,
    pub error_message: Option<String>,
}

/// The closing half of a [`JobExecutionRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobFinish {
    pub finished_at: DateTime<Utc>,
    pub status: JobStatus,
    pub duration_ms: i64,
    pub rows_affected: Option<i64>,
    pub error_message: Option<String>,
}
