//! Transition function of the session reconciler.
//!
//! Everything here is synchronous and clock-free: the caller passes `now`
//! and the intent marker in. The async driver in the parent module owns the
//! timer and the event stream.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use army_command_core::{Identity, UserId};

use crate::intent::IntentMarker;

/// How long the reconciler waits for a missing identity to come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePolicy {
    /// Grace after a signed-in identity drops to "no identity".
    pub recovery: Duration,
    /// Grace for a cold start that expects a persisted session to be restored.
    pub restore: Duration,
}

impl Default for GracePolicy {
    fn default() -> Self {
        Self {
            recovery: Duration::from_millis(5_000),
            restore: Duration::from_millis(2_000),
        }
    }
}

/// The externally visible session: who is signed in, and whether that answer
/// can be trusted yet.
///
/// While `resolving` is true, callers must not make navigation decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub identity: Option<Identity>,
    pub resolving: bool,
}

impl SessionView {
    /// Resolved and signed in.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.identity.is_some() && !self.resolving
    }

    /// Resolved and signed out.
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        self.identity.is_none() && !self.resolving
    }
}

/// A grace period elapsed without the identity coming back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecoveryTimeout {
    #[error("session of {0} was not recovered within the grace period")]
    Dropped(UserId),
    #[error("persisted session was not restored within the grace period")]
    NotRestored,
}

/// What an identity event did to the state.
#[derive(Debug, PartialEq, Eq)]
pub enum Transition {
    /// The event did not change anything.
    Unchanged,
    /// Signed in. `is_new` is false when the identity was already showing,
    /// e.g. a token refresh or a recovered drop.
    Authenticated { identity: Identity, is_new: bool },
    /// "No identity" with no intent to be signed in.
    SignedOut,
    /// "No identity" for a signed-in member; the cached identity is served
    /// until the deadline.
    Recovering { uid: UserId, deadline: Instant },
    /// "No identity" on a cold start that expects a restore.
    AwaitingRestore { deadline: Instant },
}

#[derive(Debug, Clone)]
enum Phase {
    Unresolved { deadline: Option<Instant> },
    Authenticated(Identity),
    Unauthenticated,
    RecoveringFromDrop { identity: Identity, deadline: Instant },
}

/// Reconciler state: the current phase plus the last identity seen.
#[derive(Debug, Clone)]
pub struct SessionState {
    phase: Phase,
    last_known: Option<Identity>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Fresh, unresolved state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::Unresolved { deadline: None },
            last_known: None,
        }
    }

    /// The pair reported to listeners.
    #[must_use]
    pub fn view(&self) -> SessionView {
        match &self.phase {
            Phase::Unresolved { .. } => SessionView {
                identity: None,
                resolving: true,
            },
            Phase::Authenticated(identity) | Phase::RecoveringFromDrop { identity, .. } => {
                SessionView {
                    identity: Some(identity.clone()),
                    resolving: false,
                }
            }
            Phase::Unauthenticated => SessionView {
                identity: None,
                resolving: false,
            },
        }
    }

    /// The pending deadline, if a grace period is running.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Unresolved { deadline } => *deadline,
            Phase::RecoveringFromDrop { deadline, .. } => Some(*deadline),
            Phase::Authenticated(_) | Phase::Unauthenticated => None,
        }
    }

    /// Whether the state is resolved and signed out.
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        matches!(self.phase, Phase::Unauthenticated)
    }

    /// Whether a drop is being held open.
    #[must_use]
    pub const fn is_recovering(&self) -> bool {
        matches!(self.phase, Phase::RecoveringFromDrop { .. })
    }

    /// Apply an identity event from the provider.
    pub fn on_identity(
        &mut self,
        identity: Option<Identity>,
        intent: &dyn IntentMarker,
        grace: &GracePolicy,
        now: Instant,
    ) -> Transition {
        match identity {
            Some(identity) => self.authenticate(identity, intent),
            None => self.drop_identity(intent, grace, now),
        }
    }

    fn authenticate(&mut self, identity: Identity, intent: &dyn IntentMarker) -> Transition {
        let is_new = self
            .view()
            .identity
            .is_none_or(|shown| shown.uid != identity.uid);

        intent.set(true);
        self.last_known = Some(identity.clone());
        self.phase = Phase::Authenticated(identity.clone());

        Transition::Authenticated { identity, is_new }
    }

    fn drop_identity(
        &mut self,
        intent: &dyn IntentMarker,
        grace: &GracePolicy,
        now: Instant,
    ) -> Transition {
        if self.is_unauthenticated() {
            return Transition::Unchanged;
        }

        if !intent.get() {
            self.last_known = None;
            self.phase = Phase::Unauthenticated;
            return Transition::SignedOut;
        }

        // A grace period already running keeps its original deadline
        if self.deadline().is_some() {
            return Transition::Unchanged;
        }

        match &self.last_known {
            Some(cached) => {
                let deadline = now + grace.recovery;
                let uid = cached.uid.clone();
                self.phase = Phase::RecoveringFromDrop {
                    identity: cached.clone(),
                    deadline,
                };
                Transition::Recovering { uid, deadline }
            }
            None => {
                let deadline = now + grace.restore;
                self.phase = Phase::Unresolved {
                    deadline: Some(deadline),
                };
                Transition::AwaitingRestore { deadline }
            }
        }
    }

    /// Resolve an elapsed grace period.
    ///
    /// Returns `None` if no deadline has passed, e.g. because it was replaced
    /// or cancelled after the timer was armed.
    pub fn on_deadline(
        &mut self,
        intent: &dyn IntentMarker,
        now: Instant,
    ) -> Option<RecoveryTimeout> {
        let timeout = match &self.phase {
            Phase::RecoveringFromDrop { identity, deadline } if *deadline <= now => {
                RecoveryTimeout::Dropped(identity.uid.clone())
            }
            Phase::Unresolved {
                deadline: Some(deadline),
            } if *deadline <= now => RecoveryTimeout::NotRestored,
            _ => return None,
        };

        intent.clear();
        self.last_known = None;
        self.phase = Phase::Unauthenticated;
        Some(timeout)
    }

    /// Explicit logout: signed out immediately, intent and cache cleared.
    pub fn on_logout(&mut self, intent: &dyn IntentMarker) {
        intent.clear();
        self.last_known = None;
        self.phase = Phase::Unauthenticated;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::intent::MemoryIntentMarker;

    fn member() -> Identity {
        Identity::new("uid-member")
    }

    fn grace() -> GracePolicy {
        GracePolicy::default()
    }

    fn signed_in(intent: &MemoryIntentMarker, now: Instant) -> SessionState {
        let mut state = SessionState::new();
        state.on_identity(Some(member()), intent, &grace(), now);
        state
    }

    #[test]
    fn test_fresh_state_is_resolving() {
        let state = SessionState::new();
        assert_eq!(
            state.view(),
            SessionView {
                identity: None,
                resolving: true
            }
        );
        assert!(state.deadline().is_none());
    }

    #[test]
    fn test_identity_authenticates_and_marks_intent() {
        let intent = MemoryIntentMarker::new(false);
        let mut state = SessionState::new();

        let transition = state.on_identity(Some(member()), &intent, &grace(), Instant::now());

        assert_eq!(
            transition,
            Transition::Authenticated {
                identity: member(),
                is_new: true
            }
        );
        assert!(state.view().is_authenticated());
        assert!(intent.get());
    }

    #[test]
    fn test_same_identity_again_is_not_new() {
        let intent = MemoryIntentMarker::new(false);
        let now = Instant::now();
        let mut state = signed_in(&intent, now);

        let transition = state.on_identity(Some(member()), &intent, &grace(), now);
        assert!(matches!(
            transition,
            Transition::Authenticated { is_new: false, .. }
        ));
    }

    #[test]
    fn test_none_without_intent_signs_out_immediately() {
        let intent = MemoryIntentMarker::new(false);
        let mut state = SessionState::new();

        let transition = state.on_identity(None, &intent, &grace(), Instant::now());

        assert_eq!(transition, Transition::SignedOut);
        assert!(state.view().is_unauthenticated());
        assert!(state.deadline().is_none());
    }

    #[test]
    fn test_none_with_intent_and_no_cache_waits_for_restore() {
        let intent = MemoryIntentMarker::new(true);
        let now = Instant::now();
        let mut state = SessionState::new();

        let transition = state.on_identity(None, &intent, &grace(), now);

        let deadline = now + Duration::from_millis(2_000);
        assert_eq!(transition, Transition::AwaitingRestore { deadline });
        assert_eq!(state.deadline(), Some(deadline));
        assert!(state.view().resolving);
    }

    #[test]
    fn test_drop_serves_cached_identity() {
        let intent = MemoryIntentMarker::new(false);
        let now = Instant::now();
        let mut state = signed_in(&intent, now);

        let later = now + Duration::from_millis(100);
        let transition = state.on_identity(None, &intent, &grace(), later);

        let deadline = later + Duration::from_millis(5_000);
        assert_eq!(
            transition,
            Transition::Recovering {
                uid: member().uid,
                deadline
            }
        );
        assert!(state.is_recovering());
        assert_eq!(
            state.view(),
            SessionView {
                identity: Some(member()),
                resolving: false
            }
        );
    }

    #[test]
    fn test_repeated_drop_keeps_deadline() {
        let intent = MemoryIntentMarker::new(true);
        let now = Instant::now();
        let mut state = signed_in(&intent, now);

        state.on_identity(None, &intent, &grace(), now);
        let transition = state.on_identity(
            None,
            &intent,
            &grace(),
            now + Duration::from_millis(3_000),
        );

        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(state.deadline(), Some(now + Duration::from_millis(5_000)));
        assert_eq!(
            state.on_deadline(&intent, now + Duration::from_millis(5_000)),
            Some(RecoveryTimeout::Dropped(member().uid))
        );
        assert!(state.view().is_unauthenticated());
    }

    #[test]
    fn test_repeated_null_keeps_restore_deadline() {
        let intent = MemoryIntentMarker::new(true);
        let now = Instant::now();
        let mut state = SessionState::new();

        state.on_identity(None, &intent, &grace(), now);
        state.on_identity(None, &intent, &grace(), now + Duration::from_millis(1_500));

        assert_eq!(state.deadline(), Some(now + Duration::from_millis(2_000)));
    }

    #[test]
    fn test_recovery_cancels_deadline() {
        let intent = MemoryIntentMarker::new(true);
        let now = Instant::now();
        let mut state = signed_in(&intent, now);

        state.on_identity(None, &intent, &grace(), now);
        let transition = state.on_identity(
            Some(member()),
            &intent,
            &grace(),
            now + Duration::from_millis(1_500),
        );

        assert!(matches!(
            transition,
            Transition::Authenticated { is_new: false, .. }
        ));
        assert!(state.deadline().is_none());
        assert!(
            state
                .on_deadline(&intent, now + Duration::from_secs(60))
                .is_none()
        );
    }

    #[test]
    fn test_recovery_as_another_identity() {
        let intent = MemoryIntentMarker::new(true);
        let now = Instant::now();
        let mut state = signed_in(&intent, now);

        state.on_identity(None, &intent, &grace(), now);
        let other = Identity::new("uid-other");
        let transition = state.on_identity(Some(other.clone()), &intent, &grace(), now);

        assert_eq!(
            transition,
            Transition::Authenticated {
                identity: other.clone(),
                is_new: true
            }
        );
        assert_eq!(state.view().identity, Some(other));
    }

    #[test]
    fn test_drop_deadline_signs_out_and_clears_intent() {
        let intent = MemoryIntentMarker::new(true);
        let now = Instant::now();
        let mut state = signed_in(&intent, now);
        state.on_identity(None, &intent, &grace(), now);

        // Not yet
        assert!(
            state
                .on_deadline(&intent, now + Duration::from_millis(4_999))
                .is_none()
        );

        let timeout = state.on_deadline(&intent, now + Duration::from_millis(5_000));
        assert_eq!(timeout, Some(RecoveryTimeout::Dropped(member().uid)));
        assert!(state.view().is_unauthenticated());
        assert!(!intent.get());

        // Stays signed out on further nulls
        state.on_identity(None, &intent, &grace(), now);
        assert!(state.view().is_unauthenticated());
        assert!(state.deadline().is_none());
    }

    #[test]
    fn test_restore_deadline_signs_out_and_clears_intent() {
        let intent = MemoryIntentMarker::new(true);
        let now = Instant::now();
        let mut state = SessionState::new();
        state.on_identity(None, &intent, &grace(), now);

        let timeout = state.on_deadline(&intent, now + Duration::from_millis(2_000));
        assert_eq!(timeout, Some(RecoveryTimeout::NotRestored));
        assert!(state.view().is_unauthenticated());
        assert!(!intent.get());
    }

    #[test]
    fn test_none_while_unauthenticated_is_ignored() {
        let intent = MemoryIntentMarker::new(true);
        let mut state = SessionState::new();
        state.on_logout(&intent);
        intent.set(true);

        let transition = state.on_identity(None, &intent, &grace(), Instant::now());
        assert_eq!(transition, Transition::Unchanged);
        assert!(state.deadline().is_none());
    }

    #[test]
    fn test_logout_from_recovery_bypasses_grace() {
        let intent = MemoryIntentMarker::new(true);
        let now = Instant::now();
        let mut state = signed_in(&intent, now);
        state.on_identity(None, &intent, &grace(), now);

        state.on_logout(&intent);

        assert!(state.view().is_unauthenticated());
        assert!(state.deadline().is_none());
        assert!(!intent.get());
        // The null that follows the provider sign-out changes nothing
        assert_eq!(
            state.on_identity(None, &intent, &grace(), now),
            Transition::Unchanged
        );
    }

    #[test]
    fn test_grace_policy_defaults() {
        let grace = GracePolicy::default();
        assert_eq!(grace.recovery, Duration::from_secs(5));
        assert_eq!(grace.restore, Duration::from_secs(2));
    }
}
