//! Server-side lock arbitration. Waiters are granted in arrival order.

use crate::connection::{LockGrant, SessionId};
use crate::lock::LockScope;
use std::collections::{HashMap, VecDeque};
use strata_topics::{LockToken, SessionError};
use tokio::sync::oneshot;

pub(super) type GrantSender = oneshot::Sender<Result<LockGrant, SessionError>>;

#[derive(Debug)]
struct Owner {
    session: SessionId,
    sequence: i64,
    scope: LockScope,
}

struct Waiter {
    session: SessionId,
    request: u64,
    scope: LockScope,
    tx: GrantSender,
}

#[derive(Default)]
struct NamedLock {
    owner: Option<Owner>,
    waiters: VecDeque<Waiter>,
}

#[derive(Default)]
pub(super) struct LockManager {
    locks: HashMap<String, NamedLock>,
    next_sequence: i64,
}

impl LockManager {
    /// Grants at once when free or already owned by `session`; otherwise
    /// queues the request.
    pub fn acquire(&mut self, session: &SessionId, request: u64, name: &str, scope: LockScope, tx: GrantSender) {
        let lock = self.locks.entry(name.to_owned()).or_default();
        if let Some(owner) = lock.owner.as_mut().filter(|owner| &owner.session == session) {
            owner.scope = owner.scope.narrowest(scope);
            let _ = tx.send(Ok(LockGrant { name: name.to_owned(), sequence: owner.sequence, scope: owner.scope }));
            return;
        }
        let free = lock.owner.is_none();
        lock.waiters.push_back(Waiter { session: session.clone(), request, scope, tx });
        if free {
            self.grant_next(name);
        }
    }

    /// Withdraws one waiting request of `session` for `name`.
    pub fn cancel(&mut self, session: &SessionId, request: u64, name: &str) -> bool {
        let Some(lock) = self.locks.get_mut(name) else {
            return false;
        };
        let Some(index) =
            lock.waiters.iter().position(|waiter| &waiter.session == session && waiter.request == request)
        else {
            return false;
        };
        if let Some(waiter) = lock.waiters.remove(index) {
            let _ = waiter.tx.send(Err(SessionError::Cancelled));
        }
        true
    }

    pub fn release(&mut self, session: &SessionId, name: &str, sequence: i64) -> bool {
        let Some(lock) = self.locks.get_mut(name) else {
            return false;
        };
        let owned = lock.owner.as_ref().is_some_and(|owner| &owner.session == session && owner.sequence == sequence);
        if owned {
            lock.owner = None;
            self.grant_next(name);
        }
        owned
    }

    pub fn holds(&self, session: &SessionId, token: &LockToken) -> bool {
        self.locks
            .get(&token.name)
            .and_then(|lock| lock.owner.as_ref())
            .is_some_and(|owner| &owner.session == session && owner.sequence == token.sequence)
    }

    /// Releases the locks `session` owns with a scope `releases` accepts and
    /// fails its waiting requests with `error`.
    pub fn release_session<F>(&mut self, session: &SessionId, releases: F, error: SessionError) -> Vec<String>
    where
        F: Fn(LockScope) -> bool,
    {
        let mut freed = Vec::new();
        for (name, lock) in self.locks.iter_mut() {
            let mut kept = VecDeque::with_capacity(lock.waiters.len());
            for waiter in lock.waiters.drain(..) {
                if &waiter.session == session {
                    let _ = waiter.tx.send(Err(error.clone()));
                } else {
                    kept.push_back(waiter);
                }
            }
            lock.waiters = kept;
            if lock.owner.as_ref().is_some_and(|owner| &owner.session == session && releases(owner.scope)) {
                lock.owner = None;
                freed.push(name.clone());
            }
        }
        for name in &freed {
            self.grant_next(name);
        }
        freed
    }

    fn grant_next(&mut self, name: &str) {
        let Some(lock) = self.locks.get_mut(name) else {
            return;
        };
        while lock.owner.is_none() {
            let Some(waiter) = lock.waiters.pop_front() else {
                break;
            };
            self.next_sequence += 1;
            let sequence = self.next_sequence;
            let grant = LockGrant { name: name.to_owned(), sequence, scope: waiter.scope };
            if waiter.tx.send(Ok(grant)).is_ok() {
                log::debug!("server: lock {}#{} granted to {}", name, sequence, waiter.session);
                lock.owner = Some(Owner { session: waiter.session, sequence, scope: waiter.scope });
            }
        }
    }
}
