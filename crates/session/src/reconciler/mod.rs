//! Session reconciler.
//!
//! Turns the provider's noisy identity stream into one debounced
//! `(identity, resolving)` answer. A "no identity" event for a member who
//! meant to stay signed in is held open for a grace period before it is
//! believed; an explicit [`SessionReconciler::logout`] is believed at once.
//!
//! # Example
//!
//! ```rust,ignore
//! let reconciler = SessionReconciler::new(provider, intent, GracePolicy::default());
//! let subscription = reconciler.start(|view| render(view))?;
//!
//! reconciler.login(credentials).await?;
//! // ...
//! reconciler.logout().await?;
//! subscription.unsubscribe();
//! ```

mod state;

pub use state::{GracePolicy, RecoveryTimeout, SessionState, SessionView, Transition};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;

use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use army_command_core::Identity;

use crate::credentials::Credentials;
use crate::error::{AuthError, SessionError};
use crate::intent::IntentMarker;
use crate::profile::ProfileSync;
use crate::provider::{IdentityEvent, IdentityProvider, IdentitySubscription};

/// Callback invoked with every change of the session view.
///
/// Runs while the reconciler's state lock is held: it must not call back
/// into the reconciler.
pub type SessionListener = Box<dyn FnMut(&SessionView) + Send>;

/// Mutable state shared between the reconciler, its task and the
/// subscription handle.
struct Core {
    state: SessionState,
    reported: SessionView,
    listener: Option<SessionListener>,
    /// Provider events, taken off the queue only while this lock is held.
    events: Option<IdentitySubscription>,
    /// Bumped by every logout. Events dequeued under an older epoch are
    /// stale.
    epoch: u64,
    stopped: bool,
}

impl Core {
    /// Drop every event the provider queued before now.
    fn discard_queued_events(&mut self) -> usize {
        let Some(events) = self.events.as_mut() else {
            return 0;
        };

        let mut discarded = 0;
        while events.try_recv().is_some() {
            discarded += 1;
        }
        discarded
    }

    /// Report the current view if it differs from the last one reported.
    fn publish(&mut self) {
        let view = self.state.view();
        if view == self.reported {
            return;
        }

        debug!(
            uid = ?view.identity.as_ref().map(|i| i.uid.as_str()),
            resolving = view.resolving,
            "Session view changed"
        );
        self.reported = view;

        if !self.stopped
            && let Some(listener) = self.listener.as_mut()
        {
            listener(&self.reported);
        }
    }
}

fn lock(core: &Mutex<Core>) -> MutexGuard<'_, Core> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared<P, M> {
    provider: P,
    intent: M,
    grace: GracePolicy,
    profile_sync: Option<Arc<dyn ProfileSync>>,
    core: Arc<Mutex<Core>>,
    wake: Notify,
    started: AtomicBool,
}

/// Builder for [`SessionReconciler`].
pub struct SessionReconcilerBuilder<P, M> {
    provider: P,
    intent: M,
    grace: GracePolicy,
    profile_sync: Option<Arc<dyn ProfileSync>>,
}

impl<P: IdentityProvider, M: IntentMarker> SessionReconcilerBuilder<P, M> {
    /// Override the grace periods.
    #[must_use]
    pub fn grace(mut self, grace: GracePolicy) -> Self {
        self.grace = grace;
        self
    }

    /// Sync the member's profile in the background after each sign-in.
    #[must_use]
    pub fn profile_sync(mut self, sync: Arc<dyn ProfileSync>) -> Self {
        self.profile_sync = Some(sync);
        self
    }

    #[must_use]
    pub fn build(self) -> SessionReconciler<P, M> {
        let state = SessionState::new();
        let reported = state.view();

        SessionReconciler {
            shared: Arc::new(Shared {
                provider: self.provider,
                intent: self.intent,
                grace: self.grace,
                profile_sync: self.profile_sync,
                core: Arc::new(Mutex::new(Core {
                    state,
                    reported,
                    listener: None,
                    events: None,
                    epoch: 0,
                    stopped: false,
                })),
                wake: Notify::new(),
                started: AtomicBool::new(false),
            }),
        }
    }
}

/// Authoritative, debounced view of who is signed in.
pub struct SessionReconciler<P, M> {
    shared: Arc<Shared<P, M>>,
}

impl<P: IdentityProvider, M: IntentMarker> SessionReconciler<P, M> {
    /// Create a reconciler over a provider and an intent marker.
    #[must_use]
    pub fn new(provider: P, intent: M, grace: GracePolicy) -> Self {
        Self::builder(provider, intent).grace(grace).build()
    }

    /// Start building a reconciler with default grace periods.
    #[must_use]
    pub fn builder(provider: P, intent: M) -> SessionReconcilerBuilder<P, M> {
        SessionReconcilerBuilder {
            provider,
            intent,
            grace: GracePolicy::default(),
            profile_sync: None,
        }
    }

    /// The identity provider this reconciler drives.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.shared.provider
    }

    /// The current session view.
    #[must_use]
    pub fn snapshot(&self) -> SessionView {
        lock(&self.shared.core).state.view()
    }

    /// Begin consuming identity events.
    ///
    /// `on_change` is called once immediately with the initial view, then on
    /// every change, until the returned subscription is unsubscribed or
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyStarted` if called more than once.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start<F>(&self, on_change: F) -> Result<SessionSubscription, SessionError>
    where
        F: FnMut(&SessionView) + Send + 'static,
    {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }

        let events = self.shared.provider.subscribe();

        {
            let mut core = lock(&self.shared.core);
            let mut listener: SessionListener = Box::new(on_change);
            listener(&core.reported);
            core.listener = Some(listener);
            core.events = Some(events);
        }

        let task = tokio::spawn(drive(Arc::clone(&self.shared)));
        debug!("Session reconciler started");

        Ok(SessionSubscription {
            core: Arc::clone(&self.shared.core),
            task: task.abort_handle(),
        })
    }

    /// Sign in.
    ///
    /// The intent marker is set before this returns; the returned future
    /// performs the provider call. The session itself follows the provider's
    /// identity events, not the result of this call.
    ///
    /// # Errors
    ///
    /// The returned future resolves to the provider's error if sign-in fails.
    pub fn login(
        &self,
        credentials: Credentials,
    ) -> impl Future<Output = Result<(), AuthError>> + Send + use<P, M> {
        self.authenticate(credentials, Action::SignIn)
    }

    /// Create an account and sign in to it. Same contract as [`Self::login`].
    ///
    /// # Errors
    ///
    /// The returned future resolves to the provider's error if registration
    /// fails, e.g. `AuthError::AccountConflict`.
    pub fn register(
        &self,
        credentials: Credentials,
    ) -> impl Future<Output = Result<(), AuthError>> + Send + use<P, M> {
        self.authenticate(credentials, Action::SignUp)
    }

    /// Sign out.
    ///
    /// The session is signed out, and the intent marker and cached identity
    /// cleared, before this returns. Identity events the provider queued
    /// before the logout are discarded. The returned future performs the
    /// provider call; whether it succeeds, fails or never finishes, the
    /// session stays signed out.
    ///
    /// # Errors
    ///
    /// The returned future resolves to the provider's error if sign-out fails.
    pub fn logout(&self) -> impl Future<Output = Result<(), AuthError>> + Send + use<P, M> {
        {
            let mut core = lock(&self.shared.core);
            let discarded = core.discard_queued_events();
            if discarded > 0 {
                debug!(discarded, "Discarded identity events queued before logout");
            }
            core.epoch += 1;
            core.state.on_logout(&self.shared.intent);
            core.publish();
        }
        self.shared.wake.notify_one();
        info!("Signed out locally");

        let shared = Arc::clone(&self.shared);
        async move {
            shared
                .provider
                .sign_out()
                .await
                .inspect_err(|e| warn!(error = %e, "Provider sign-out failed"))
        }
    }

    fn authenticate(
        &self,
        credentials: Credentials,
        action: Action,
    ) -> impl Future<Output = Result<(), AuthError>> + Send + use<P, M> {
        self.shared.intent.set(true);

        let shared = Arc::clone(&self.shared);
        async move {
            let result = match action {
                Action::SignIn => shared.provider.sign_in(&credentials).await,
                Action::SignUp => shared.provider.sign_up(&credentials).await,
            };

            match result {
                Ok(identity) => {
                    debug!(uid = %identity.uid, action = action.as_str(), "Provider accepted credentials");
                    Ok(())
                }
                Err(e) => {
                    info!(error = %e, action = action.as_str(), "Provider rejected credentials");
                    shared.forget_failed_intent();
                    Err(e)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    SignIn,
    SignUp,
}

impl Action {
    const fn as_str(self) -> &'static str {
        match self {
            Self::SignIn => "login",
            Self::SignUp => "register",
        }
    }
}

impl<P: IdentityProvider, M: IntentMarker> Shared<P, M> {
    fn apply_identity(&self, identity: Option<Identity>, epoch: u64) {
        let mut core = lock(&self.core);
        if core.stopped {
            return;
        }
        if core.epoch != epoch {
            debug!("Discarded identity event received before logout");
            return;
        }

        let transition = core
            .state
            .on_identity(identity, &self.intent, &self.grace, Instant::now());
        core.publish();
        drop(core);

        match transition {
            Transition::Authenticated {
                identity,
                is_new: true,
            } => {
                info!(uid = %identity.uid, "Session authenticated");
                self.spawn_profile_sync(identity);
            }
            Transition::Authenticated { is_new: false, .. } | Transition::Unchanged => {}
            Transition::SignedOut => info!("Session signed out"),
            Transition::Recovering { uid, .. } => {
                info!(uid = %uid, grace = ?self.grace.recovery, "Identity dropped, holding session open");
            }
            Transition::AwaitingRestore { .. } => {
                info!(grace = ?self.grace.restore, "Waiting for persisted session to be restored");
            }
        }
    }

    fn apply_deadline(&self) {
        let mut core = lock(&self.core);
        if core.stopped {
            return;
        }

        let timeout = core.state.on_deadline(&self.intent, Instant::now());
        core.publish();
        drop(core);

        if let Some(timeout) = timeout {
            info!(error = %timeout, "Session ended");
        }
    }

    /// Undo the optimistic intent of a failed login if nobody is signed in.
    fn forget_failed_intent(&self) {
        let core = lock(&self.core);
        if core.state.is_unauthenticated() {
            self.intent.set(false);
        }
    }

    fn spawn_profile_sync(&self, identity: Identity) {
        let Some(sync) = self.profile_sync.clone() else {
            return;
        };

        tokio::spawn(async move {
            let uid = identity.uid.clone();
            if let Err(e) = sync.sync(identity).await {
                warn!(uid = %uid, error = %e, "Background profile sync failed");
            }
        });
    }
}

/// Event loop: one task per started reconciler.
async fn drive<P: IdentityProvider, M: IntentMarker>(shared: Arc<Shared<P, M>>) {
    loop {
        let deadline = lock(&shared.core).state.deadline();

        tokio::select! {
            (event, epoch) = next_event(&shared.core) => match event {
                Some(IdentityEvent::Changed(identity)) => shared.apply_identity(identity, epoch),
                Some(IdentityEvent::StreamError(e)) => {
                    warn!(error = %e, "Identity stream error ignored");
                }
                None => {
                    debug!("Identity provider closed its event stream");
                    return;
                }
            },
            () = sleep_until(deadline) => shared.apply_deadline(),
            () = shared.wake.notified() => {}
        }
    }
}

/// The next provider event, tagged with the epoch it was dequeued in.
async fn next_event(core: &Mutex<Core>) -> (Option<IdentityEvent>, u64) {
    std::future::poll_fn(|cx| {
        let mut core = lock(core);
        let epoch = core.epoch;
        match core.events.as_mut() {
            Some(events) => events.poll_recv(cx).map(|event| (event, epoch)),
            None => Poll::Ready((None, epoch)),
        }
    })
    .await
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handle returned by [`SessionReconciler::start`].
///
/// Unsubscribing (or dropping the handle) stops the deadline timer and
/// detaches from the provider. No listener call happens after
/// [`SessionSubscription::unsubscribe`] returns.
pub struct SessionSubscription {
    core: Arc<Mutex<Core>>,
    task: AbortHandle,
}

impl SessionSubscription {
    /// Stop receiving session changes. Calling this again does nothing.
    pub fn unsubscribe(&self) {
        {
            let mut core = lock(&self.core);
            if core.stopped {
                return;
            }
            core.stopped = true;
            core.listener = None;
            core.events = None;
        }
        self.task.abort();
        debug!("Session reconciler stopped");
    }

    /// Whether [`Self::unsubscribe`] has been called.
    #[must_use]
    pub fn is_unsubscribed(&self) -> bool {
        lock(&self.core).stopped
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SessionSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSubscription")
            .field("unsubscribed", &self.is_unsubscribed())
            .finish_non_exhaustive()
    }
}
