//! Session locks.
//!
//! A session lock is a named, server-arbitrated mutual exclusion between
//! sessions. Each acquisition gets a larger sequence number, usable as a
//! fencing token in update constraints. Ownership ends on explicit unlock or
//! automatically, exactly once, on the trigger its scope names.

use crate::connection::LockGrant;
use crate::session::SessionInner;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use strata_topics::{LockToken, SessionError};
use tokio::sync::oneshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// Released when the connection is lost, even if it is later recovered.
    UnlockOnConnectionLoss,
    /// Released only when the session closes.
    UnlockOnSessionLoss,
}

impl LockScope {
    /// The scope an owner keeps when it acquires the same lock again.
    pub(crate) fn narrowest(self, other: LockScope) -> LockScope {
        if self == LockScope::UnlockOnConnectionLoss || other == LockScope::UnlockOnConnectionLoss {
            LockScope::UnlockOnConnectionLoss
        } else {
            LockScope::UnlockOnSessionLoss
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReleaseTrigger {
    ConnectionLoss,
    SessionClose,
}

impl fmt::Display for ReleaseTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLoss => f.write_str("connection loss"),
            Self::SessionClose => f.write_str("session close"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct LockShared {
    name: String,
    sequence: i64,
    /// Narrowed when the owner acquires the lock again.
    scope: Mutex<LockScope>,
    owned: AtomicBool,
}

impl LockShared {
    fn scope(&self) -> LockScope {
        *self.scope.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One acquisition of a named lock. Clones and repeated acquisitions by the
/// owner compare equal.
#[derive(Clone)]
pub struct SessionLock {
    shared: Arc<LockShared>,
    session: Arc<SessionInner>,
}

impl SessionLock {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn sequence(&self) -> i64 {
        self.shared.sequence
    }

    pub fn scope(&self) -> LockScope {
        self.shared.scope()
    }

    /// Whether the session still owns this acquisition, as far as it knows.
    pub fn is_owned(&self) -> bool {
        self.shared.owned.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> LockToken {
        LockToken { name: self.shared.name.clone(), sequence: self.shared.sequence }
    }

    /// Releases the lock. Resolves to whether it was owned.
    pub async fn unlock(&self) -> Result<bool, SessionError> {
        self.session.ensure_open()?;
        let name = self.shared.name.clone();
        let sequence = self.shared.sequence;
        let was_owned = self
            .session
            .call(move |connection| {
                let name = name.clone();
                async move { connection.release_lock(&name, sequence).await }
            })
            .await?;
        self.shared.owned.store(false, Ordering::SeqCst);
        self.session.locks.forget(&self.shared);
        log::debug!("session({}): lock {}#{} unlocked", self.session.id, self.shared.name, self.shared.sequence);
        Ok(was_owned)
    }
}

impl PartialEq for SessionLock {
    fn eq(&self, other: &Self) -> bool {
        self.shared.name == other.shared.name
            && self.shared.sequence == other.shared.sequence
            && self.shared.scope() == other.shared.scope()
    }
}

impl Eq for SessionLock {}

impl fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLock")
            .field("name", &self.shared.name)
            .field("sequence", &self.shared.sequence)
            .field("scope", &self.shared.scope())
            .field("owned", &self.is_owned())
            .finish()
    }
}

impl From<&SessionLock> for LockToken {
    fn from(lock: &SessionLock) -> Self {
        lock.token()
    }
}

/// Acquisitions this session believes it owns.
#[derive(Default)]
pub(crate) struct LockTable {
    held: Mutex<Vec<Arc<LockShared>>>,
    next_request: AtomicU64,
}

impl LockTable {
    pub fn next_request(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the existing record for a repeated grant, so re-locking
    /// yields an equal lock. The record takes the scope of the grant.
    pub fn record(&self, name: &str, sequence: i64, scope: LockScope) -> Arc<LockShared> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = held.iter().find(|lock| lock.name == name && lock.sequence == sequence) {
            if existing.owned.load(Ordering::SeqCst) {
                *existing.scope.lock().unwrap_or_else(PoisonError::into_inner) = scope;
                return existing.clone();
            }
        }
        held.retain(|lock| lock.name != name);
        let shared = Arc::new(LockShared {
            name: name.to_owned(),
            sequence,
            scope: Mutex::new(scope),
            owned: AtomicBool::new(true),
        });
        held.push(shared.clone());
        shared
    }

    pub fn forget(&self, shared: &Arc<LockShared>) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.retain(|lock| !Arc::ptr_eq(lock, shared));
    }

    /// Marks acquisitions released by `trigger` as no longer owned and
    /// returns their names.
    pub fn release(&self, trigger: ReleaseTrigger) -> Vec<String> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let mut released = Vec::new();
        held.retain(|lock| {
            let applies = match trigger {
                ReleaseTrigger::ConnectionLoss => lock.scope() == LockScope::UnlockOnConnectionLoss,
                ReleaseTrigger::SessionClose => true,
            };
            if applies && lock.owned.swap(false, Ordering::SeqCst) {
                released.push(lock.name.clone());
            }
            !applies
        });
        released
    }
}

pub(crate) fn session_lock(shared: Arc<LockShared>, session: Arc<SessionInner>) -> SessionLock {
    SessionLock { shared, session }
}

#[derive(Debug, PartialEq, Eq)]
enum AttemptPhase {
    Pending,
    Resolved,
    Cancelled,
}

/// A lock acquisition in progress.
pub struct LockAttempt {
    phase: Arc<Mutex<AttemptPhase>>,
    outcome: Option<oneshot::Receiver<Result<SessionLock, SessionError>>>,
    session: Arc<SessionInner>,
    name: String,
    request: u64,
}

impl LockAttempt {
    pub(crate) fn start(session: Arc<SessionInner>, name: String, scope: LockScope) -> Self {
        let phase = Arc::new(Mutex::new(AttemptPhase::Pending));
        let request = session.locks.next_request();
        let (tx, rx) = oneshot::channel();
        let task = {
            let phase = phase.clone();
            let session = session.clone();
            let name = name.clone();
            async move {
                let acquired = {
                    let name = name.clone();
                    session
                        .call(move |connection| {
                            let name = name.clone();
                            async move { connection.acquire_lock(request, &name, scope).await }
                        })
                        .await
                };
                let mut phase = phase.lock().unwrap_or_else(PoisonError::into_inner);
                if *phase == AttemptPhase::Cancelled {
                    if let Ok(grant) = acquired {
                        log::debug!("session({}): releasing lock {} granted after cancel", session.id, name);
                        let releasing = session.clone();
                        let LockGrant { name: granted, sequence, .. } = grant;
                        tokio::spawn(async move {
                            let _ = releasing
                                .call(move |connection| {
                                    let name = granted.clone();
                                    async move { connection.release_lock(&name, sequence).await }
                                })
                                .await;
                        });
                    }
                    let _ = tx.send(Err(SessionError::Cancelled));
                    return;
                }
                *phase = AttemptPhase::Resolved;
                drop(phase);
                let outcome = acquired.map(|grant| {
                    log::debug!("session({}): lock {}#{} acquired", session.id, grant.name, grant.sequence);
                    let shared = session.locks.record(&grant.name, grant.sequence, grant.scope);
                    session_lock(shared, session.clone())
                });
                let _ = tx.send(outcome);
            }
        };
        tokio::spawn(task);
        Self { phase, outcome: Some(rx), session, name, request }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancels the attempt if it has not resolved. A lock granted after
    /// cancellation is released at once.
    pub fn cancel(&self) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase != AttemptPhase::Pending {
            return false;
        }
        *phase = AttemptPhase::Cancelled;
        drop(phase);
        let session = self.session.clone();
        let name = self.name.clone();
        let request = self.request;
        tokio::spawn(async move {
            let result = session
                .call(move |connection| {
                    let name = name.clone();
                    async move { connection.cancel_lock_request(request, &name).await }
                })
                .await;
            if let Err(err) = result {
                log::debug!("session({}): lock cancel not delivered: {}", session.id, err);
            }
        });
        true
    }

    pub fn is_resolved(&self) -> bool {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) != AttemptPhase::Pending
    }

    /// Waits for the outcome. Resolves once; later calls fail with
    /// `Cancelled`.
    pub async fn wait(&mut self) -> Result<SessionLock, SessionError> {
        let Some(outcome) = self.outcome.take() else {
            return Err(SessionError::Cancelled);
        };
        outcome.await.unwrap_or(Err(SessionError::Cancelled))
    }
}

impl fmt::Debug for LockAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockAttempt").field("name", &self.name).field("resolved", &self.is_resolved()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowest_scope_prefers_connection_loss() {
        use LockScope::*;
        assert_eq!(UnlockOnSessionLoss.narrowest(UnlockOnConnectionLoss), UnlockOnConnectionLoss);
        assert_eq!(UnlockOnSessionLoss.narrowest(UnlockOnSessionLoss), UnlockOnSessionLoss);
    }

    #[test]
    fn table_releases_each_scope_on_its_own_trigger_once() {
        let table = LockTable::default();
        let connection = table.record("c", 1, LockScope::UnlockOnConnectionLoss);
        let session = table.record("s", 2, LockScope::UnlockOnSessionLoss);

        assert_eq!(table.release(ReleaseTrigger::ConnectionLoss), vec!["c".to_string()]);
        assert!(!connection.owned.load(Ordering::SeqCst));
        assert!(session.owned.load(Ordering::SeqCst));
        assert!(table.release(ReleaseTrigger::ConnectionLoss).is_empty());

        assert_eq!(table.release(ReleaseTrigger::SessionClose), vec!["s".to_string()]);
        assert!(!session.owned.load(Ordering::SeqCst));
        assert!(table.release(ReleaseTrigger::SessionClose).is_empty());
    }

    #[test]
    fn repeated_grant_returns_same_record() {
        let table = LockTable::default();
        let first = table.record("l", 3, LockScope::UnlockOnSessionLoss);
        let again = table.record("l", 3, LockScope::UnlockOnSessionLoss);
        assert!(Arc::ptr_eq(&first, &again));

        let newer = table.record("l", 4, LockScope::UnlockOnSessionLoss);
        assert!(!Arc::ptr_eq(&first, &newer));
    }

    #[test]
    fn repeated_grant_narrows_the_recorded_scope() {
        let table = LockTable::default();
        let first = table.record("l", 3, LockScope::UnlockOnSessionLoss);
        table.record("l", 3, LockScope::UnlockOnConnectionLoss);
        assert_eq!(first.scope(), LockScope::UnlockOnConnectionLoss);

        assert_eq!(table.release(ReleaseTrigger::ConnectionLoss), vec!["l".to_string()]);
        assert!(!first.owned.load(Ordering::SeqCst));
    }
}
