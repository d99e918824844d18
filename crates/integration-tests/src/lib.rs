//! Integration test support for Army Command sessions.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p army-command-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `session_reconciler` - Reconciler scenarios against a scripted provider
//! - `session_persistence` - Intent marker persistence across restarts
//!
//! All timing tests run on a paused Tokio clock, so grace periods elapse
//! instantly and deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use secrecy::SecretString;
use tokio::time::Instant;

use army_command_core::{Email, Identity};
use army_command_session::{
    AuthError, Credentials, IdentityBroadcaster, IdentityProvider, IdentitySubscription,
    ProfileSync, ProfileSyncError, SessionView,
};

/// A member signed in by service number.
#[must_use]
pub fn member() -> Identity {
    member_with("uid-2470", "2470-0001")
}

/// A member with a specific uid and service number.
///
/// # Panics
///
/// Panics if `service_number` does not form a valid email.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn member_with(uid: &str, service_number: &str) -> Identity {
    Identity::new(uid).with_email(Email::parse(&format!("{service_number}@army.bts")).unwrap())
}

/// Credentials for [`member`].
///
/// # Panics
///
/// Never: the service number is valid.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn credentials() -> Credentials {
    Credentials::service_number("2470-0001", SecretString::from("hunter22")).unwrap()
}

/// Let spawned tasks run without moving the paused clock past anything that
/// matters.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Scripted identity provider
// =============================================================================

/// What [`FakeIdentityProvider::sign_out`] does.
#[derive(Debug, Clone)]
pub enum SignOutBehavior {
    /// Emit "no identity" and succeed.
    Succeed,
    /// Fail without emitting anything.
    Fail(AuthError),
    /// Never finish.
    Hang,
}

struct FakeInner {
    events: IdentityBroadcaster,
    sign_in_results: Mutex<VecDeque<Result<Identity, AuthError>>>,
    sign_out: Mutex<SignOutBehavior>,
    sign_out_calls: AtomicUsize,
}

/// Identity provider whose events and call results are scripted by the test.
///
/// Clones share state, so a test can keep a handle after moving one into a
/// reconciler.
#[derive(Clone)]
pub struct FakeIdentityProvider {
    inner: Arc<FakeInner>,
}

impl Default for FakeIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeInner {
                events: IdentityBroadcaster::new(),
                sign_in_results: Mutex::new(VecDeque::new()),
                sign_out: Mutex::new(SignOutBehavior::Succeed),
                sign_out_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Emit an identity event.
    pub fn emit(&self, identity: Option<Identity>) {
        self.inner.events.publish(identity);
    }

    /// Emit a transient stream failure.
    pub fn emit_error(&self) {
        self.inner
            .events
            .publish_error(AuthError::ProviderUnavailable("connection reset".to_string()));
    }

    /// Queue the result of the next `sign_in` or `sign_up`.
    pub fn script_sign_in(&self, result: Result<Identity, AuthError>) {
        lock(&self.inner.sign_in_results).push_back(result);
    }

    /// Choose what `sign_out` does.
    pub fn script_sign_out(&self, behavior: SignOutBehavior) {
        *lock(&self.inner.sign_out) = behavior;
    }

    /// How many times `sign_out` was called.
    #[must_use]
    pub fn sign_out_calls(&self) -> usize {
        self.inner.sign_out_calls.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.events.subscriber_count()
    }

    fn next_sign_in(&self) -> Result<Identity, AuthError> {
        let result = lock(&self.inner.sign_in_results)
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::ProviderUnavailable("no scripted result".to_string())));

        if let Ok(identity) = &result {
            self.inner.events.publish(Some(identity.clone()));
        }
        result
    }
}

impl IdentityProvider for FakeIdentityProvider {
    fn subscribe(&self) -> IdentitySubscription {
        self.inner.events.subscribe()
    }

    async fn sign_in(&self, _credentials: &Credentials) -> Result<Identity, AuthError> {
        self.next_sign_in()
    }

    async fn sign_up(&self, _credentials: &Credentials) -> Result<Identity, AuthError> {
        self.next_sign_in()
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.inner.sign_out).clone();

        match behavior {
            SignOutBehavior::Succeed => {
                self.inner.events.publish(None);
                Ok(())
            }
            SignOutBehavior::Fail(e) => Err(e),
            SignOutBehavior::Hang => std::future::pending().await,
        }
    }
}

// =============================================================================
// Session view recorder
// =============================================================================

/// Collects every view a reconciler reports, with the (paused) time it was
/// reported at.
#[derive(Clone, Default)]
pub struct Recorder {
    views: Arc<Mutex<Vec<(Instant, SessionView)>>>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener to pass to `SessionReconciler::start`.
    #[must_use]
    pub fn listener(&self) -> impl FnMut(&SessionView) + Send + 'static {
        let views = Arc::clone(&self.views);
        move |view: &SessionView| lock(&views).push((Instant::now(), view.clone()))
    }

    /// Every reported view, in order.
    #[must_use]
    pub fn views(&self) -> Vec<SessionView> {
        lock(&self.views).iter().map(|(_, view)| view.clone()).collect()
    }

    /// Every reported view with its report time.
    #[must_use]
    pub fn timed(&self) -> Vec<(Instant, SessionView)> {
        lock(&self.views).clone()
    }

    /// The most recent view.
    #[must_use]
    pub fn last(&self) -> Option<SessionView> {
        lock(&self.views).last().map(|(_, view)| view.clone())
    }

    /// Number of listener calls so far.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.views).len()
    }

    /// Whether the listener has not been called.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any view reported a resolved sign-out.
    #[must_use]
    pub fn saw_signed_out(&self) -> bool {
        lock(&self.views)
            .iter()
            .any(|(_, view)| view.is_unauthenticated())
    }
}

// =============================================================================
// Profile sync double
// =============================================================================

/// Profile sync that counts calls and optionally fails.
#[derive(Default)]
pub struct CountingProfileSync {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingProfileSync {
    /// A sync that always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    /// How many syncs were started.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProfileSync for CountingProfileSync {
    fn sync(&self, _identity: Identity) -> BoxFuture<'static, Result<(), ProfileSyncError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                Err(ProfileSyncError::NoToken)
            } else {
                Ok(())
            }
        })
    }
}
