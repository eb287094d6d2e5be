//! # Connection-scoped locks
//!
//! A session-scoped advisory lock lives on the physical connection that took it. Taking the lock through one pooled
//! connection and releasing it through another silently fails to release it, and the lock then lingers until that
//! first connection is eventually closed.
//!
//! [`SessionLock`] makes that mistake unrepresentable. The guard *owns* the connection lease for as long as the lock
//! is held, the unlock is issued through the guard (and therefore on the same connection), and only then is the
//! connection handed back to the pool. If the guard is dropped without being released (the owning future was
//! cancelled, or something panicked) the connection is discarded rather than pooled. Closing the connection is the
//! server-side release path, so the lock cannot outlive the guard.
//!
//! [`with_lock`] wraps the guard for the common "run this body under the lock" case.
use std::fmt::Debug;

use log::*;

use crate::{
    lock_keys::LockKey,
    traits::{SessionLockDatabase, StoreError},
};

/// The result of a non-blocking lock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome<T> {
    /// The lock was taken, the body ran, and the lock was released.
    Acquired(T),
    /// Another session holds the lock. The body did not run.
    Busy,
}

impl<T> LockOutcome<T> {
    pub fn is_busy(&self) -> bool {
        matches!(self, LockOutcome::Busy)
    }

    pub fn acquired(self) -> Option<T> {
        match self {
            LockOutcome::Acquired(t) => Some(t),
            LockOutcome::Busy => None,
        }
    }
}

/// A held session-scoped lock together with the connection it was taken on.
pub struct SessionLock<'a, B: SessionLockDatabase> {
    db: &'a B,
    key: LockKey,
    session: B::Session,
    released: bool,
}

impl<B: SessionLockDatabase> Debug for SessionLock<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionLock({}, released: {})", self.key, self.released)
    }
}

impl<'a, B: SessionLockDatabase> SessionLock<'a, B> {
    /// Checks out one connection and tries to lock `key` on it. Returns `Ok(None)` without waiting if the lock is
    /// held elsewhere; the connection goes straight back to the pool in that case.
    pub async fn try_acquire(db: &'a B, key: LockKey) -> Result<Option<Self>, StoreError> {
        let mut session = db.checkout().await?;
        match db.try_advisory_lock(&mut session, key).await {
            Ok(true) => {
                trace!("🔒️ Acquired {key}");
                Ok(Some(Self { db, key, session, released: false }))
            },
            Ok(false) => {
                trace!("🔒️ {key} is busy");
                Ok(None)
            },
            Err(e) => {
                // We can't tell whether the lock was taken before the error surfaced.
                warn!("🔒️ Error trying to acquire {key}. Discarding the connection. {e}");
                db.discard(&mut session);
                Err(e)
            },
        }
    }

    pub fn key(&self) -> LockKey {
        self.key
    }

    /// The connection holding the lock. Anything that must run inside the critical section runs on this.
    pub fn session(&mut self) -> &mut B::Session {
        &mut self.session
    }

    /// Unlocks on the same connection and returns it to the pool.
    ///
    /// If the unlock fails, or reports that the lock was not held, the connection is discarded instead.
    pub async fn release(mut self) -> Result<(), StoreError> {
        let key = self.key;
        match self.db.advisory_unlock(&mut self.session, key).await {
            Ok(true) => {
                self.released = true;
                trace!("🔒️ Released {key}");
                Ok(())
            },
            Ok(false) => {
                warn!("🔒️ {key} was not held by its session at release time. Discarding the connection.");
                Ok(())
            },
            Err(e) => {
                error!("🔒️ Could not release {key}. The connection will be discarded. {e}");
                Err(e)
            },
        }
    }
}

impl<B: SessionLockDatabase> Drop for SessionLock<'_, B> {
    fn drop(&mut self) {
        if !self.released {
            debug!("🔒️ {} dropped without a confirmed release. Discarding its connection.", self.key);
            self.db.discard(&mut self.session);
        }
    }
}

/// Runs `body` while holding the session-scoped lock for `key`.
///
/// Exactly one physical connection is used for the lock, the body and the unlock. If the lock is busy, `body` is
/// not run and [`LockOutcome::Busy`] is returned. The unlock runs whether `body` succeeded or failed. A failed
/// unlock is logged but does not mask the body's result, since the connection is discarded and the lock goes with it.
pub async fn with_lock<B, T, E, F>(db: &B, key: LockKey, body: F) -> Result<LockOutcome<T>, E>
where
    B: SessionLockDatabase,
    E: From<StoreError>,
    F: AsyncFnOnce(&mut B::Session) -> Result<T, E>,
{
    let Some(mut lock) = SessionLock::try_acquire(db, key).await? else {
        return Ok(LockOutcome::Busy);
    };
    let result = body(lock.session()).await;
    if let Err(e) = lock.release().await {
        warn!("🔒️ Ignoring release failure for {key} after the critical section completed. {e}");
    }
    result.map(LockOutcome::Acquired)
}
