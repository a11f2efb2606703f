//! Per-symbol advancement locks.
//!
//! At most one thread advances a given symbol at a time. Other threads asking
//! for the same symbol block until the owner releases it and then observe the
//! phase it reached. A request that would deadlock (the owner asking again, or
//! a waits-for chain that leads back to the requester) fails with
//! [`AdvanceError::Recursive`] instead.

use crate::symbols::{CallableId, ClassId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKey {
    Class(ClassId),
    Callable(CallableId),
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKey::Class(id) => write!(f, "{}", id),
            SymbolKey::Callable(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceError {
    #[error("recursive advancement of {0}")]
    Recursive(SymbolKey),
}

#[derive(Debug, Default)]
struct LockState {
    owners: HashMap<SymbolKey, ThreadId>,
    waiting: HashMap<ThreadId, SymbolKey>,
}

impl LockState {
    /// Whether `requester` waiting on a key owned by `owner` closes a cycle.
    fn closes_cycle(&self, requester: ThreadId, owner: ThreadId) -> bool {
        let mut current = owner;
        for _ in 0..=self.waiting.len() {
            if current == requester {
                return true;
            }
            match self.waiting.get(&current).and_then(|key| self.owners.get(key)) {
                Some(next) => current = *next,
                None => return false,
            }
        }
        false
    }
}

#[derive(Debug, Default)]
pub struct PhaseLocks {
    state: Mutex<LockState>,
    released: Condvar,
}

impl PhaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the advancement lock for `key`, blocking while another thread holds it.
    pub fn acquire(&self, key: SymbolKey) -> Result<PhaseGuard<'_>, AdvanceError> {
        let me = thread::current().id();
        let mut state = self.lock();
        loop {
            match state.owners.get(&key).copied() {
                None => {
                    state.owners.insert(key, me);
                    state.waiting.remove(&me);
                    return Ok(PhaseGuard { locks: self, key });
                }
                Some(owner) if owner == me => {
                    state.waiting.remove(&me);
                    return Err(AdvanceError::Recursive(key));
                }
                Some(owner) => {
                    if state.closes_cycle(me, owner) {
                        state.waiting.remove(&me);
                        trace!("waits-for cycle while acquiring {}", key);
                        return Err(AdvanceError::Recursive(key));
                    }
                    state.waiting.insert(me, key);
                    state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    pub fn is_held(&self, key: SymbolKey) -> bool {
        self.lock().owners.contains_key(&key)
    }

    pub fn held_by_current_thread(&self, key: SymbolKey) -> bool {
        self.lock().owners.get(&key) == Some(&thread::current().id())
    }
}

#[must_use]
pub struct PhaseGuard<'a> {
    locks: &'a PhaseLocks,
    key: SymbolKey,
}

impl PhaseGuard<'_> {
    pub fn key(&self) -> SymbolKey {
        self.key
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.locks.lock();
        state.owners.remove(&self.key);
        drop(state);
        self.locks.released.notify_all();
    }
}
