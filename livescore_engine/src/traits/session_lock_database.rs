use crate::{lock_keys::LockKey, traits::StoreError};

/// Access to physical database connections and the session-scoped advisory lock primitives that run on them.
///
/// A session-scoped lock belongs to the connection that took it. It is released either by an unlock issued on
/// *that same connection*, or by the connection closing. Unlocking through any other connection is a no-op, and a
/// connection returned to the pool while still holding a lock leaks the lock until the pool eventually closes it.
///
/// Implementations therefore never expose a "run one query on any connection" path for the lock primitives: both
/// [`Self::try_advisory_lock`] and [`Self::advisory_unlock`] take the session explicitly.
#[allow(async_fn_in_trait)]
pub trait SessionLockDatabase: Clone {
    /// A checked-out physical connection. Dropping it returns the connection to the pool.
    type Session: Send;

    /// Checks out one physical connection. This may wait for the pool, bounded by its acquire timeout.
    async fn checkout(&self) -> Result<Self::Session, StoreError>;

    /// Attempts to take the lock for `key` on `session`. Never blocks: returns `false` if another session holds it.
    async fn try_advisory_lock(&self, session: &mut Self::Session, key: LockKey) -> Result<bool, StoreError>;

    /// Releases the lock for `key` held by `session`. Returns `false` if this session did not hold it.
    async fn advisory_unlock(&self, session: &mut Self::Session, key: LockKey) -> Result<bool, StoreError>;

    /// Closes the session's connection instead of returning it to the pool, which releases every session-scoped
    /// lock it holds. Used when an unlock could not be confirmed. The session is unusable afterwards.
    fn discard(&self, session: &mut Self::Session);
}
