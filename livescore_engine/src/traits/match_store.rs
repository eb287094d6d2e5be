use crate::{
    db_types::{MatchRecord, MatchStatus, NewMatch},
    traits::{SessionLockDatabase, StoreError},
};

/// Persistence for live match records.
#[allow(async_fn_in_trait)]
pub trait MatchStore: SessionLockDatabase {
    /// Inserts a new match. Fails with [`StoreError::MatchAlreadyExists`] if the id is taken.
    async fn insert_match(&self, new_match: NewMatch) -> Result<MatchRecord, StoreError>;

    /// Reads a match without taking any lock.
    async fn fetch_match(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError>;

    /// Reads every match currently in one of `statuses`, ordered by `match_id`.
    async fn fetch_matches_with_status(&self, statuses: &[MatchStatus]) -> Result<Vec<MatchRecord>, StoreError>;

    /// Loads the match inside a single transaction on `session`, hands it to `modify`, and writes it back if
    /// `modify` changed it. The read and the write commit together or not at all.
    ///
    /// Returns `None` if the match does not exist, otherwise whatever `modify` returned.
    async fn modify_match<F, R>(
        &self,
        session: &mut Self::Session,
        match_id: &str,
        modify: F,
    ) -> Result<Option<R>, StoreError>
    where
        F: FnOnce(&mut MatchRecord) -> R + Send,
        R: Send;
}
