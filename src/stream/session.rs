//! # Stream Session Management
//!
//! Tracks the lock that gates who may push audio. Each connection starts with
//! an unlocked session; a successful LOCK issues a token that must be echoed
//! back to SEND or UNLOCK.
//!
//! ## Session Lifecycle:
//! 1. **Unlocked**: Initial state, and the state after UNLOCK or disconnect
//! 2. **Locked(token)**: A client holds the recording slot
//!
//! The token is a capability: whoever presents the exact string is treated as
//! the holder. It is never bound to connection identity.
//!
//! ## Lock Scope:
//! - **Connection**: every connection owns an independent [`Session`]
//! - **Server**: every connection shares one [`LockSlot`] behind a mutex, and
//!   only the connection that acquired the lock releases it on disconnect

use crate::error::{ProtocolError, TokenOperation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Last timestamp (microseconds since epoch) used for a token.
static LAST_ISSUED_MICROS: AtomicI64 = AtomicI64::new(0);

/// Opaque lock token handed to the client on LOCK.
///
/// ## Format:
/// `client-token-<seconds>.<microseconds>` taken from the wall clock. The
/// timestamp is forced strictly increasing for the lifetime of the process,
/// so two locks in the same microsecond still get different tokens. Clients
/// must treat the value as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Issue a token that differs from every token issued before it.
    pub fn issue() -> Self {
        let now = Utc::now().timestamp_micros();
        let previous = match LAST_ISSUED_MICROS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        }) {
            Ok(prev) | Err(prev) => prev,
        };
        let stamp = now.max(previous + 1);

        Self(format!(
            "client-token-{}.{:06}",
            stamp.div_euclid(1_000_000),
            stamp.rem_euclid(1_000_000)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact string comparison against what the client presented.
    pub fn matches(&self, presented: Option<&str>) -> bool {
        presented == Some(self.0.as_str())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock state of one session: unlocked, or locked with a token.
#[derive(Debug, Default)]
pub struct Session {
    token: Option<LockToken>,
    locked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.token.is_some()
    }

    /// When the current lock was acquired, if locked.
    pub fn locked_at(&self) -> Option<DateTime<Utc>> {
        self.locked_at
    }

    /// Acquire the lock.
    ///
    /// ## State Transition:
    /// Unlocked → Locked(new token). Fails with `AlreadyLocked` when held.
    pub fn lock(&mut self) -> Result<LockToken, ProtocolError> {
        if self.token.is_some() {
            return Err(ProtocolError::AlreadyLocked);
        }

        let token = LockToken::issue();
        self.token = Some(token.clone());
        self.locked_at = Some(Utc::now());
        Ok(token)
    }

    /// Release the lock if `presented` is the current token.
    ///
    /// ## State Transition:
    /// Locked(t) → Unlocked on exact match; state is unchanged on any failure.
    pub fn unlock(&mut self, presented: Option<&str>) -> Result<(), ProtocolError> {
        self.check_token(presented, TokenOperation::Unlock)?;
        self.reset();
        Ok(())
    }

    /// Check that `presented` authorizes a SEND. Never changes state.
    pub fn authorize_send(&self, presented: Option<&str>) -> Result<(), ProtocolError> {
        self.check_token(presented, TokenOperation::Send)
    }

    /// Drop any held token and return to Unlocked.
    pub fn reset(&mut self) -> Option<LockToken> {
        self.locked_at = None;
        self.token.take()
    }

    fn check_token(&self, presented: Option<&str>, op: TokenOperation) -> Result<(), ProtocolError> {
        match &self.token {
            None => Err(ProtocolError::UnreachableState),
            Some(token) if token.matches(presented) => Ok(()),
            Some(_) => Err(ProtocolError::InvalidToken(op)),
        }
    }
}

/// Process-wide lock slot used when the lock scope is `server`.
#[derive(Debug, Default)]
pub struct LockSlot {
    session: Session,
    owner: Option<Uuid>,
}

/// Reportable view of the server-wide slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockSlotStatus {
    pub held: bool,
    /// Connection that acquired the current lock
    pub owner: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl LockSlot {
    pub fn is_locked(&self) -> bool {
        self.session.is_locked()
    }

    pub fn status(&self) -> LockSlotStatus {
        LockSlotStatus {
            held: self.is_locked(),
            owner: self.owner,
            locked_at: self.session.locked_at(),
        }
    }
}

pub type SharedLockSlot = Arc<Mutex<LockSlot>>;

/// Lock the shared slot. A poisoned mutex still holds a consistent
/// `LockSlot` (every mutation is a single assignment), so the guard is reused.
pub fn lock_slot(slot: &SharedLockSlot) -> MutexGuard<'_, LockSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The session a connection acts on.
pub enum SessionHandle {
    /// Independent session owned by this connection
    Connection(Session),

    /// Shared server-wide slot
    Server {
        slot: SharedLockSlot,
        connection_id: Uuid,
    },
}

impl SessionHandle {
    pub fn for_connection() -> Self {
        SessionHandle::Connection(Session::new())
    }

    pub fn shared(slot: SharedLockSlot, connection_id: Uuid) -> Self {
        SessionHandle::Server { slot, connection_id }
    }

    pub fn is_locked(&self) -> bool {
        match self {
            SessionHandle::Connection(session) => session.is_locked(),
            SessionHandle::Server { slot, .. } => lock_slot(slot).is_locked(),
        }
    }

    pub fn lock(&mut self) -> Result<LockToken, ProtocolError> {
        match self {
            SessionHandle::Connection(session) => session.lock(),
            SessionHandle::Server { slot, connection_id } => {
                let mut slot = lock_slot(slot);
                let token = slot.session.lock()?;
                slot.owner = Some(*connection_id);
                Ok(token)
            }
        }
    }

    pub fn unlock(&mut self, presented: Option<&str>) -> Result<(), ProtocolError> {
        match self {
            SessionHandle::Connection(session) => session.unlock(presented),
            SessionHandle::Server { slot, .. } => {
                let mut slot = lock_slot(slot);
                slot.session.unlock(presented)?;
                slot.owner = None;
                Ok(())
            }
        }
    }

    pub fn authorize_send(&self, presented: Option<&str>) -> Result<(), ProtocolError> {
        match self {
            SessionHandle::Connection(session) => session.authorize_send(presented),
            SessionHandle::Server { slot, .. } => lock_slot(slot).session.authorize_send(presented),
        }
    }

    /// Connection teardown. Returns the token that was discarded, if any.
    ///
    /// In server scope the slot is only released when this connection owns it.
    pub fn release(&mut self) -> Option<LockToken> {
        match self {
            SessionHandle::Connection(session) => session.reset(),
            SessionHandle::Server { slot, connection_id } => {
                let mut slot = lock_slot(slot);
                if slot.owner != Some(*connection_id) {
                    return None;
                }
                slot.owner = None;
                slot.session.reset()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_only_first_lock_succeeds() {
        let mut session = Session::new();
        let token = session.lock().unwrap();
        assert!(!token.as_str().is_empty());

        for _ in 0..5 {
            assert_eq!(session.lock(), Err(ProtocolError::AlreadyLocked));
        }
        assert!(session.authorize_send(Some(token.as_str())).is_ok());
        assert!(session.locked_at().is_some());
    }

    #[test]
    fn test_tokens_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let token = LockToken::issue();
            assert!(token.as_str().starts_with("client-token-"));
            assert!(seen.insert(token), "duplicate token issued");
        }
    }

    #[test]
    fn test_unlock_then_relock_issues_new_token() {
        let mut session = Session::new();
        let first = session.lock().unwrap();

        session.unlock(Some(first.as_str())).unwrap();
        assert!(!session.is_locked());
        assert!(session.locked_at().is_none());

        let second = session.lock().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_wrong_token_leaves_state_unchanged() {
        let mut session = Session::new();
        let token = session.lock().unwrap();

        assert_eq!(
            session.unlock(Some("client-token-0.000000")),
            Err(ProtocolError::InvalidToken(TokenOperation::Unlock))
        );
        assert_eq!(
            session.unlock(None),
            Err(ProtocolError::InvalidToken(TokenOperation::Unlock))
        );
        assert_eq!(
            session.authorize_send(Some("nope")),
            Err(ProtocolError::InvalidToken(TokenOperation::Send))
        );
        assert_eq!(
            session.authorize_send(None),
            Err(ProtocolError::InvalidToken(TokenOperation::Send))
        );

        assert!(session.is_locked());
        assert!(session.authorize_send(Some(token.as_str())).is_ok());
    }

    #[test]
    fn test_never_locked_session_is_unreachable() {
        let mut session = Session::new();
        assert_eq!(session.unlock(Some("anything")), Err(ProtocolError::UnreachableState));
        assert_eq!(session.authorize_send(None), Err(ProtocolError::UnreachableState));
        assert!(!session.is_locked());
    }

    #[test]
    fn test_connection_release_discards_token() {
        let mut handle = SessionHandle::for_connection();
        let token = handle.lock().unwrap();

        assert_eq!(handle.release(), Some(token.clone()));
        assert!(!handle.is_locked());
        assert_eq!(handle.unlock(Some(token.as_str())), Err(ProtocolError::UnreachableState));
    }

    #[test]
    fn test_connection_scope_sessions_are_independent() {
        let mut a = SessionHandle::for_connection();
        let mut b = SessionHandle::for_connection();
        assert!(a.lock().is_ok());
        assert!(b.lock().is_ok());
    }

    #[test]
    fn test_server_scope_shares_one_slot() {
        let slot = SharedLockSlot::default();
        let (id_a, id_b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut a = SessionHandle::shared(slot.clone(), id_a);
        let mut b = SessionHandle::shared(slot.clone(), id_b);

        let token = a.lock().unwrap();
        assert_eq!(b.lock(), Err(ProtocolError::AlreadyLocked));
        assert!(b.is_locked());
        let status = lock_slot(&slot).status();
        assert!(status.held);
        assert_eq!(status.owner, Some(id_a));
        assert!(status.locked_at.is_some());

        // The token is a capability: any holder may use it.
        assert!(b.authorize_send(Some(token.as_str())).is_ok());
        b.unlock(Some(token.as_str())).unwrap();
        assert!(!a.is_locked());
        assert_eq!(
            lock_slot(&slot).status(),
            LockSlotStatus { held: false, owner: None, locked_at: None }
        );
    }

    #[test]
    fn test_server_scope_release_only_by_owner() {
        let slot = SharedLockSlot::default();
        let mut owner = SessionHandle::shared(slot.clone(), Uuid::new_v4());
        let mut other = SessionHandle::shared(slot.clone(), Uuid::new_v4());

        let token = owner.lock().unwrap();
        assert_eq!(other.release(), None);
        assert!(owner.is_locked());

        assert_eq!(owner.release(), Some(token));
        assert!(!other.is_locked());
        assert!(other.lock().is_ok());
    }
}
