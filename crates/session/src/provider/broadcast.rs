//! Fan-out of identity events to subscribers.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use army_command_core::Identity;

use super::{IdentityEvent, IdentitySubscription};

/// Delivers identity events to every live subscriber, in order.
///
/// Remembers the last resolved identity so that late subscribers start from
/// the provider's current state, the way the hosted SDK's auth listener
/// fires once on registration.
#[derive(Debug, Default)]
pub struct IdentityBroadcaster {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    subscribers: Vec<mpsc::UnboundedSender<IdentityEvent>>,
    /// `None` until the provider has resolved its first state.
    current: Option<Option<Identity>>,
}

impl IdentityBroadcaster {
    /// Create a broadcaster with no resolved state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber, replaying the current state if it is known.
    pub fn subscribe(&self) -> IdentitySubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = &inner.current {
            // Receiver is alive, the send cannot fail
            let _ = tx.send(IdentityEvent::Changed(current.clone()));
        }

        inner.subscribers.push(tx);
        IdentitySubscription::new(rx)
    }

    /// Publish an identity change and remember it as the current state.
    pub fn publish(&self, identity: Option<Identity>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.current = Some(identity.clone());
        Self::send(&mut inner, &IdentityEvent::Changed(identity));
    }

    /// Publish a transient stream failure. Does not change the current state.
    pub fn publish_error(&self, error: crate::error::AuthError) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Self::send(&mut inner, &IdentityEvent::StreamError(error));
    }

    /// The last published identity, if the state has been resolved.
    #[must_use]
    pub fn current(&self) -> Option<Option<Identity>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// Number of subscribers that are still attached.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    fn send(inner: &mut Inner, event: &IdentityEvent) {
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        trace!(subscribers = inner.subscribers.len(), "Broadcast identity event");
    }
}
