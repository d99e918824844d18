//! Identity provider boundary.
//!
//! The identity provider owns the truth about who is signed in and reports
//! it as a stream of events. It is also known to report "no identity"
//! spuriously when its connection drops; the
//! [`SessionReconciler`](crate::reconciler::SessionReconciler) exists to
//! absorb that.
//!
//! # Implementations
//!
//! - [`IdentityToolkitClient`] - REST client for the hosted identity service
//! - Test doubles in the integration-tests crate

mod broadcast;
pub mod toolkit;

pub use broadcast::IdentityBroadcaster;
pub use toolkit::IdentityToolkitClient;

use std::future::Future;
use std::task::{Context, Poll};

use tokio::sync::mpsc;

use army_command_core::Identity;

use crate::credentials::Credentials;
use crate::error::AuthError;

/// One item of the identity event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    /// The provider's view of the current identity changed.
    ///
    /// `None` may be spurious (network stress) and is not proof of sign-out.
    Changed(Option<Identity>),
    /// The provider hit a transient failure while maintaining the session.
    ///
    /// This is not an identity change and must not be treated as one.
    StreamError(AuthError),
}

/// Ordered stream of identity events from one provider subscription.
///
/// Dropping the subscription detaches it from the provider.
#[derive(Debug)]
pub struct IdentitySubscription {
    events: mpsc::UnboundedReceiver<IdentityEvent>,
}

impl IdentitySubscription {
    pub(crate) const fn new(events: mpsc::UnboundedReceiver<IdentityEvent>) -> Self {
        Self { events }
    }

    /// Receive the next event, or `None` once the provider has shut down.
    pub async fn recv(&mut self) -> Option<IdentityEvent> {
        self.events.recv().await
    }

    /// Poll for the next event, registering `cx` for wake-up if none is
    /// queued.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<IdentityEvent>> {
        self.events.poll_recv(cx)
    }

    /// Receive an event if one is already queued.
    pub fn try_recv(&mut self) -> Option<IdentityEvent> {
        self.events.try_recv().ok()
    }
}

/// A source of identity events plus the calls that change the identity.
///
/// Sign-in and sign-up resolve with the new identity, but session state must
/// follow the event stream, not these return values: the provider emits a
/// matching [`IdentityEvent::Changed`] for every successful call.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Subscribe to identity changes.
    ///
    /// Once the provider has resolved its initial state, a new subscriber
    /// receives that state immediately.
    fn subscribe(&self) -> IdentitySubscription;

    /// Sign in to an existing account.
    fn sign_in(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Identity, AuthError>> + Send;

    /// Create an account and sign in to it.
    fn sign_up(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Identity, AuthError>> + Send;

    /// Sign out of the current account.
    fn sign_out(&self) -> impl Future<Output = Result<(), AuthError>> + Send;
}
