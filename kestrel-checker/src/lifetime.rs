//! Validity and accessibility of analysis sessions.
//!
//! Every module owns a [`ModificationTracker`]; a session snapshots the sum of
//! the trackers it can observe when it is created and is valid exactly as long
//! as that sum is unchanged. Invalidation is latched. Accessibility depends on
//! the calling thread and is evaluated anew on every access against the
//! per-thread session stacks held by the [`SessionRegistry`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use thiserror::Error;
use tracing::trace;

/// Monotonic modification counter.
#[derive(Debug, Default)]
pub struct ModificationTracker {
    count: AtomicU64,
}

impl ModificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Record a modification and return the new count.
    pub fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Sum of several trackers; changes iff any of them changes.
#[derive(Debug, Clone, Default)]
pub struct CompositeTracker {
    trackers: Vec<Arc<ModificationTracker>>,
}

impl CompositeTracker {
    pub fn new(trackers: Vec<Arc<ModificationTracker>>) -> Self {
        CompositeTracker { trackers }
    }

    pub fn count(&self) -> u64 {
        self.trackers.iter().fold(0u64, |sum, t| sum.wrapping_add(t.count()))
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessPolicy {
    /// Results are readable while the session is entered on the calling thread.
    #[default]
    AnalysisScope,
    /// As `AnalysisScope`, and additionally not from UI-blocking sections
    /// unless analysis was explicitly allowed there.
    Interactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    Modified { snapshot: u64, current: u64 },
    Disposed,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Modified { snapshot, current } => write!(
                f,
                "the project was modified after the session was created (modification count {} -> {})",
                snapshot, current
            ),
            InvalidReason::Disposed => write!(f, "the session was explicitly invalidated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InaccessibleReason {
    OutsideAnalysisScope {
        thread: ThreadId,
        innermost: Option<SessionId>,
    },
    UiBlocking {
        thread: ThreadId,
    },
}

impl fmt::Display for InaccessibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InaccessibleReason::OutsideAnalysisScope { thread, innermost } => {
                write!(f, "the session is not the innermost one on thread {:?}", thread)?;
                match innermost {
                    Some(current) => write!(f, " (innermost session there is {})", current),
                    None => write!(f, " (no session is active there)"),
                }
            }
            InaccessibleReason::UiBlocking { thread } => write!(
                f,
                "thread {:?} is inside a UI-blocking section and analysis was not allowed there",
                thread
            ),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionAccessError {
    #[error("invalid session access to {session}: {reason}")]
    Invalid { session: SessionId, reason: InvalidReason },

    #[error("inaccessible session access to {session}: {reason}")]
    Inaccessible {
        session: SessionId,
        reason: InaccessibleReason,
    },
}

impl SessionAccessError {
    /// Human-readable reason, rendered on request.
    pub fn reason(&self) -> String {
        match self {
            SessionAccessError::Invalid { reason, .. } => reason.to_string(),
            SessionAccessError::Inaccessible { reason, .. } => reason.to_string(),
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, SessionAccessError::Invalid { .. })
    }
}

/// A coarse interruption point for long computations.
pub trait Checkpoint: Send + Sync {
    fn checkpoint(&self) -> Result<(), SessionAccessError>;
}

/// Never interrupts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoint;

impl Checkpoint for NoCheckpoint {
    fn checkpoint(&self) -> Result<(), SessionAccessError> {
        Ok(())
    }
}

/// Snapshot of a composite tracker; invalid once the tracker moves.
#[derive(Debug)]
pub struct ValidityToken {
    session: SessionId,
    tracker: CompositeTracker,
    snapshot: u64,
    invalidated: AtomicBool,
    disposed: AtomicBool,
}

impl ValidityToken {
    pub fn new(session: SessionId, tracker: CompositeTracker) -> Self {
        let snapshot = tracker.count();
        ValidityToken {
            session,
            tracker,
            snapshot,
            invalidated: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Re-reads the trackers; once false, stays false.
    pub fn is_valid(&self) -> bool {
        if self.invalidated.load(Ordering::Acquire) {
            return false;
        }
        if self.tracker.count() != self.snapshot {
            self.invalidated.store(true, Ordering::Release);
            trace!("{} invalidated by modification", self.session);
            return false;
        }
        true
    }

    pub fn invalidate(&self) {
        self.disposed.store(true, Ordering::Release);
        self.invalidated.store(true, Ordering::Release);
    }

    pub fn check(&self) -> Result<(), SessionAccessError> {
        if self.is_valid() {
            return Ok(());
        }
        let reason = if self.disposed.load(Ordering::Acquire) {
            InvalidReason::Disposed
        } else {
            InvalidReason::Modified {
                snapshot: self.snapshot,
                current: self.tracker.count(),
            }
        };
        Err(SessionAccessError::Invalid {
            session: self.session,
            reason,
        })
    }
}

impl Checkpoint for ValidityToken {
    fn checkpoint(&self) -> Result<(), SessionAccessError> {
        self.check()
    }
}

/// Per-thread session stacks and execution flags.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    stacks: DashMap<ThreadId, Vec<SessionId>>,
    ui_blocking: DashMap<ThreadId, usize>,
    analysis_allowed: DashMap<ThreadId, usize>,
    next_session: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::Relaxed))
    }

    pub fn push(&self, session: SessionId) {
        self.stacks.entry(thread::current().id()).or_default().push(session);
    }

    /// Remove the innermost occurrence of `session` from the calling thread's stack.
    pub fn pop(&self, session: SessionId) {
        let thread = thread::current().id();
        let now_empty = match self.stacks.get_mut(&thread) {
            Some(mut stack) => {
                if let Some(position) = stack.iter().rposition(|s| *s == session) {
                    stack.remove(position);
                }
                stack.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.stacks.remove_if(&thread, |_, stack| stack.is_empty());
        }
    }

    /// Innermost session entered on the calling thread.
    pub fn current(&self) -> Option<SessionId> {
        self.stacks
            .get(&thread::current().id())
            .and_then(|stack| stack.last().copied())
    }

    pub fn depth(&self) -> usize {
        self.stacks.get(&thread::current().id()).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_entered(&self, session: SessionId) -> bool {
        self.stacks
            .get(&thread::current().id())
            .is_some_and(|stack| stack.contains(&session))
    }

    pub fn enter_ui_blocking(&self) -> ThreadFlagGuard<'_> {
        ThreadFlagGuard::raise(&self.ui_blocking)
    }

    pub fn allow_analysis(&self) -> ThreadFlagGuard<'_> {
        ThreadFlagGuard::raise(&self.analysis_allowed)
    }

    pub fn is_ui_blocking(&self) -> bool {
        flag_is_set(&self.ui_blocking)
    }

    pub fn is_analysis_allowed(&self) -> bool {
        flag_is_set(&self.analysis_allowed)
    }

    pub fn check_accessible(&self, session: SessionId, policy: AccessPolicy) -> Result<(), SessionAccessError> {
        let thread = thread::current().id();
        if self.current() != Some(session) {
            return Err(SessionAccessError::Inaccessible {
                session,
                reason: InaccessibleReason::OutsideAnalysisScope {
                    thread,
                    innermost: self.current(),
                },
            });
        }
        if policy == AccessPolicy::Interactive && self.is_ui_blocking() && !self.is_analysis_allowed() {
            return Err(SessionAccessError::Inaccessible {
                session,
                reason: InaccessibleReason::UiBlocking { thread },
            });
        }
        Ok(())
    }
}

fn flag_is_set(flags: &DashMap<ThreadId, usize>) -> bool {
    flags.get(&thread::current().id()).is_some_and(|depth| *depth > 0)
}

/// Keeps a per-thread flag raised until dropped. Nests.
#[must_use]
pub struct ThreadFlagGuard<'a> {
    flags: &'a DashMap<ThreadId, usize>,
    thread: ThreadId,
}

impl<'a> ThreadFlagGuard<'a> {
    fn raise(flags: &'a DashMap<ThreadId, usize>) -> Self {
        let thread = thread::current().id();
        *flags.entry(thread).or_insert(0) += 1;
        ThreadFlagGuard { flags, thread }
    }
}

impl Drop for ThreadFlagGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut depth) = self.flags.get_mut(&self.thread) {
            *depth = depth.saturating_sub(1);
        }
        self.flags.remove_if(&self.thread, |_, depth| *depth == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_tracker_changes_with_any_member() {
        let a = Arc::new(ModificationTracker::new());
        let b = Arc::new(ModificationTracker::new());
        let composite = CompositeTracker::new(vec![a.clone(), b.clone()]);
        let before = composite.count();
        b.increment();
        assert_ne!(composite.count(), before);
    }

    #[test]
    fn test_token_invalidation_is_latched() {
        let tracker = Arc::new(ModificationTracker::new());
        let token = ValidityToken::new(SessionId(1), CompositeTracker::new(vec![tracker.clone()]));
        assert!(token.is_valid());
        assert!(token.check().is_ok());

        tracker.increment();
        assert!(!token.is_valid());
        let error = token.check().unwrap_err();
        assert!(error.is_invalid());
        assert!(!error.reason().is_empty());
        assert!(error.to_string().contains("session#1"));
        assert!(!token.is_valid());
    }

    #[test]
    fn test_explicit_invalidation_reason() {
        let token = ValidityToken::new(SessionId(2), CompositeTracker::default());
        token.invalidate();
        let error = token.check().unwrap_err();
        assert_eq!(
            error,
            SessionAccessError::Invalid {
                session: SessionId(2),
                reason: InvalidReason::Disposed
            }
        );
    }

    #[test]
    fn test_stacks_are_per_thread() {
        let registry = Arc::new(SessionRegistry::new());
        let outer = registry.allocate_id();
        let inner = registry.allocate_id();
        registry.push(outer);
        registry.push(inner);
        assert_eq!(registry.current(), Some(inner));
        assert_eq!(registry.depth(), 2);
        assert!(registry.is_entered(outer));
        assert!(registry.check_accessible(inner, AccessPolicy::AnalysisScope).is_ok());
        let shadowed = registry.check_accessible(outer, AccessPolicy::AnalysisScope).unwrap_err();
        assert!(shadowed.reason().contains(&inner.to_string()));

        let other = registry.clone();
        let seen = std::thread::spawn(move || {
            (other.current(), other.check_accessible(inner, AccessPolicy::AnalysisScope).is_err())
        })
        .join()
        .unwrap();
        assert_eq!(seen, (None, true));

        registry.pop(inner);
        assert_eq!(registry.current(), Some(outer));
        assert!(registry.check_accessible(outer, AccessPolicy::AnalysisScope).is_ok());
        registry.pop(outer);
        let error = registry.check_accessible(outer, AccessPolicy::AnalysisScope).unwrap_err();
        assert!(!error.is_invalid());
        assert!(!error.reason().is_empty());
    }

    #[test]
    fn test_ui_blocking_requires_override() {
        let registry = SessionRegistry::new();
        let session = registry.allocate_id();
        registry.push(session);

        let blocking = registry.enter_ui_blocking();
        assert!(registry.check_accessible(session, AccessPolicy::AnalysisScope).is_ok());
        assert!(registry.check_accessible(session, AccessPolicy::Interactive).is_err());
        {
            let _allowed = registry.allow_analysis();
            assert!(registry.check_accessible(session, AccessPolicy::Interactive).is_ok());
        }
        assert!(registry.check_accessible(session, AccessPolicy::Interactive).is_err());
        drop(blocking);
        assert!(registry.check_accessible(session, AccessPolicy::Interactive).is_ok());
        registry.pop(session);
    }
}
