//! # Match orchestrator
//!
//! Every writer that changes a live match (the score feed, the reconciliation sync, the watchdog, admins, the minute
//! engine) goes through [`MatchOrchestrator::update_match`]. A batch of proposed field values is applied under the
//! match's session-scoped lock, in one transaction, on the connection holding the lock.
//!
//! ## Conflict rule
//!
//! Each field remembers the priority and timestamp of its last successful writer. A proposed value is applied iff
//!
//! * its priority is strictly higher than the stored priority, or
//! * the priorities are equal and its timestamp is not older than the stored write.
//!
//! A lower-priority source therefore never overwrites a higher-priority value, however much later it arrives. Fields
//! that have never been written by a prioritised source accept any valid value.
//!
//! Once a match reaches a terminal status it is immutable, and every later batch is rejected as a whole.
use std::{fmt::Debug, sync::Arc};

use log::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db_types::{FieldProvenance, FieldUpdate, MatchField, MatchRecord, MatchStatus},
    lock_keys::match_lock_key,
    metrics::MetricsSink,
    session_lock::SessionLock,
    source::Source,
    traits::{MatchStore, StoreError},
};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Success,
    /// The match id was empty, or no such match exists.
    RejectedInvalid,
    /// The match is in a terminal status.
    RejectedImmutable,
    /// Another writer holds the match's lock. The caller may retry.
    RejectedLocked,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Success => "success",
            UpdateStatus::RejectedInvalid => "rejected_invalid",
            UpdateStatus::RejectedImmutable => "rejected_immutable",
            UpdateStatus::RejectedLocked => "rejected_locked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub status: UpdateStatus,
    /// Fields whose stored value changed. Only ever non-empty on success.
    pub changed_fields: Vec<MatchField>,
}

impl UpdateResult {
    pub fn success(changed_fields: Vec<MatchField>) -> Self {
        Self { status: UpdateStatus::Success, changed_fields }
    }

    pub fn rejected(status: UpdateStatus) -> Self {
        Self { status, changed_fields: Vec::new() }
    }

    pub fn is_success(&self) -> bool {
        self.status == UpdateStatus::Success
    }
}

enum Applied {
    Immutable,
    Changed(Vec<MatchField>),
}

pub struct MatchOrchestrator<B> {
    db: B,
    metrics: Arc<dyn MetricsSink>,
}

impl<B> Debug for MatchOrchestrator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MatchOrchestrator")
    }
}

impl<B: Clone> Clone for MatchOrchestrator<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), metrics: self.metrics.clone() }
    }
}

impl<B> MatchOrchestrator<B> {
    pub fn new(db: B, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { db, metrics }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> MatchOrchestrator<B>
where B: MatchStore
{
    /// Applies a batch of field updates to one match.
    ///
    /// Rejections are returned as an [`UpdateResult`] status. An `Err` means the database itself could not be
    /// reached or failed mid-transaction, in which case nothing was written.
    ///
    /// `source` identifies the caller for logging and metrics. Each update carries its own source and priority.
    pub async fn update_match(
        &self,
        match_id: Option<&str>,
        updates: Vec<FieldUpdate>,
        source: Source,
    ) -> Result<UpdateResult, OrchestratorError> {
        let result = self.try_update(match_id, updates, source).await;
        match &result {
            Ok(r) => self.metrics.incr("match.update", &[("source", source.as_str()), ("status", r.status.as_str())]),
            Err(_) => self.metrics.incr("match.update", &[("source", source.as_str()), ("status", "error")]),
        }
        result
    }

    async fn try_update(
        &self,
        match_id: Option<&str>,
        updates: Vec<FieldUpdate>,
        source: Source,
    ) -> Result<UpdateResult, OrchestratorError> {
        let Some(key) = match_lock_key(match_id) else {
            debug!("⚽️ Update from {source} rejected: no match id");
            return Ok(UpdateResult::rejected(UpdateStatus::RejectedInvalid));
        };
        let match_id = match_id.unwrap_or_default();
        let Some(mut lock) = SessionLock::try_acquire(&self.db, key).await? else {
            debug!("⚽️ Match {match_id} is locked by another writer. Update from {source} rejected.");
            return Ok(UpdateResult::rejected(UpdateStatus::RejectedLocked));
        };
        let applied = self
            .db
            .modify_match(lock.session(), match_id, |record| {
                if record.is_immutable() {
                    return Applied::Immutable;
                }
                Applied::Changed(apply_updates(record, updates))
            })
            .await;
        if let Err(e) = lock.release().await {
            warn!("⚽️ Lock release for match {match_id} failed after the update completed. {e}");
        }
        let result = match applied? {
            None => {
                debug!("⚽️ Match {match_id} does not exist. Update from {source} rejected.");
                UpdateResult::rejected(UpdateStatus::RejectedInvalid)
            },
            Some(Applied::Immutable) => {
                debug!("⚽️ Match {match_id} has finished. Update from {source} rejected.");
                UpdateResult::rejected(UpdateStatus::RejectedImmutable)
            },
            Some(Applied::Changed(changed)) => {
                if !changed.is_empty() {
                    info!("⚽️ Match {match_id} updated by {source}: {}", field_list(&changed));
                }
                UpdateResult::success(changed)
            },
        };
        Ok(result)
    }

    /// Reads a match without taking its lock.
    pub async fn fetch_match(&self, match_id: &str) -> Result<Option<MatchRecord>, OrchestratorError> {
        let record = self.db.fetch_match(match_id).await?;
        Ok(record)
    }
}

/// Applies `updates` to `record` following the conflict rule, oldest proposal first. Invalid values are dropped.
///
/// Returns the fields whose value changed, in the order they were first changed. An update that repeats the stored
/// value is not a change. It only takes over the field's provenance if its priority is strictly higher, so periodic
/// writers re-proposing the same value do not touch the record.
pub fn apply_updates(record: &mut MatchRecord, mut updates: Vec<FieldUpdate>) -> Vec<MatchField> {
    updates.sort_by_key(|u| u.timestamp);
    let mut changed = Vec::new();
    for update in updates {
        let field = update.field;
        let value = match field.canonical_value(&update.value) {
            Ok(v) => v,
            Err(e) => {
                warn!("⚽️ Dropping update from {} to match {}. {e}", update.source, record.match_id);
                continue;
            },
        };
        if let Some(stored) = record.provenance(field) {
            if !supersedes(&update, stored) {
                trace!(
                    "⚽️ {field} on match {} was written by {} (priority {}). Ignoring {} (priority {}).",
                    record.match_id,
                    stored.source,
                    stored.priority,
                    update.source,
                    update.priority()
                );
                continue;
            }
        }
        if record.fields.get(field.as_str()) == Some(&value) {
            // Repeating the stored value only matters if it raises the bar for later writers
            if record.provenance(field).is_none_or(|stored| update.priority() > stored.priority) {
                record.provenance.insert(field, FieldProvenance::from(&update));
            }
            continue;
        }
        if field == MatchField::Status {
            match value.as_str().map(str::parse::<MatchStatus>) {
                Some(Ok(status)) => record.status = status,
                _ => continue,
            }
        }
        record.fields.insert(field.as_str().to_string(), value);
        record.provenance.insert(field, FieldProvenance::from(&update));
        if !changed.contains(&field) {
            changed.push(field);
        }
    }
    changed
}

fn supersedes(update: &FieldUpdate, stored: &FieldProvenance) -> bool {
    let priority = update.priority();
    priority > stored.priority || (priority == stored.priority && update.timestamp >= stored.written_at)
}

fn field_list(fields: &[MatchField]) -> String {
    fields.iter().map(MatchField::as_str).collect::<Vec<&str>>().join(", ")
}
