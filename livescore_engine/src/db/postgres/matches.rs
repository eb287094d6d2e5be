use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::trace;
use serde_json::{Map, Value};
use sqlx::{types::Json, FromRow, PgConnection};

use crate::{
    db_types::{FieldProvenance, MatchField, MatchRecord, MatchStatus, NewMatch},
    traits::StoreError,
};

#[derive(Debug, FromRow)]
struct MatchRow {
    match_id: String,
    status: String,
    fields: Json<Map<String, Value>>,
    provenance: Json<BTreeMap<MatchField, FieldProvenance>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MatchRow> for MatchRecord {
    type Error = StoreError;

    fn try_from(row: MatchRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<MatchStatus>()
            .map_err(|e| StoreError::CorruptRecord(format!("Match {}: {e}", row.match_id)))?;
        Ok(Self {
            match_id: row.match_id,
            status,
            fields: row.fields.0,
            provenance: row.provenance.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Inserts a new match. Fails with [`StoreError::MatchAlreadyExists`] if the id is already taken.
pub async fn insert_match(new_match: NewMatch, conn: &mut PgConnection) -> Result<MatchRecord, StoreError> {
    let row: Option<MatchRow> = sqlx::query_as(
        r#"
            INSERT INTO live_matches (match_id, status, fields)
            VALUES ($1, $2, $3)
            ON CONFLICT (match_id) DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(&new_match.match_id)
    .bind(new_match.status.as_str())
    .bind(Json(&new_match.fields))
    .fetch_optional(conn)
    .await?;
    let row = row.ok_or(StoreError::MatchAlreadyExists(new_match.match_id))?;
    MatchRecord::try_from(row)
}

pub async fn fetch_match(match_id: &str, conn: &mut PgConnection) -> Result<Option<MatchRecord>, StoreError> {
    let row: Option<MatchRow> =
        sqlx::query_as("SELECT * FROM live_matches WHERE match_id = $1").bind(match_id).fetch_optional(conn).await?;
    row.map(MatchRecord::try_from).transpose()
}

/// As [`fetch_match`], but also takes the row lock. Only meaningful inside a transaction.
pub async fn fetch_match_for_update(
    match_id: &str,
    conn: &mut PgConnection,
) -> Result<Option<MatchRecord>, StoreError> {
    let row: Option<MatchRow> = sqlx::query_as("SELECT * FROM live_matches WHERE match_id = $1 FOR UPDATE")
        .bind(match_id)
        .fetch_optional(conn)
        .await?;
    row.map(MatchRecord::try_from).transpose()
}

pub async fn fetch_matches_with_status(
    statuses: &[MatchStatus],
    conn: &mut PgConnection,
) -> Result<Vec<MatchRecord>, StoreError> {
    let statuses = statuses.iter().map(|s| s.as_str().to_string()).collect::<Vec<String>>();
    let rows: Vec<MatchRow> =
        sqlx::query_as("SELECT * FROM live_matches WHERE status = ANY($1) ORDER BY match_id")
            .bind(statuses)
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(MatchRecord::try_from).collect()
}

/// Overwrites the status, field values and provenance of an existing match. Not atomic on its own; run it inside
/// the same transaction that read the record.
pub async fn save_match(record: &MatchRecord, conn: &mut PgConnection) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
            UPDATE live_matches
            SET status = $2, fields = $3, provenance = $4, updated_at = now()
            WHERE match_id = $1
        "#,
    )
    .bind(&record.match_id)
    .bind(record.status.as_str())
    .bind(Json(&record.fields))
    .bind(Json(&record.provenance))
    .execute(conn)
    .await?;
    trace!("🗃️ Match {} saved ({} rows)", record.match_id, result.rows_affected());
    Ok(())
}
