//! CLI commands.
//!
//! Every command wires the same pieces: the identity client, the file-backed
//! intent marker and a reconciler over both. The reconciler is started
//! before the client restores its persisted session, so the restore is
//! observed like any other identity event.

pub mod auth;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use army_command_session::{
    AuthError, FileIntentMarker, IdentityToolkitClient, SaveUserEndpoint, SessionConfig,
    SessionError, SessionReconciler, SessionSubscription, SessionView,
};

/// Longest a command waits for the session to settle.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from session commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("session did not settle within {0:?}")]
    Timeout(Duration),

    #[error("session stopped before it settled")]
    Stopped,
}

/// A started reconciler over the configured identity service.
pub struct Session {
    pub client: IdentityToolkitClient,
    pub reconciler: SessionReconciler<IdentityToolkitClient, FileIntentMarker>,
    pub views: watch::Receiver<SessionView>,
    subscription: SessionSubscription,
}

impl Session {
    /// Build, start, and restore the persisted session.
    ///
    /// # Errors
    ///
    /// Returns an error if the reconciler cannot be started.
    pub async fn open(config: &SessionConfig) -> Result<Self, CommandError> {
        let client = IdentityToolkitClient::new(config);
        let intent = FileIntentMarker::open(config.intent_path());

        let mut builder = SessionReconciler::builder(client.clone(), intent).grace(config.grace);
        if let Some(url) = &config.profile_sync_url {
            builder = builder.profile_sync(Arc::new(SaveUserEndpoint::new(
                url.clone(),
                client.clone(),
            )));
        }
        let reconciler = builder.build();

        let (tx, views) = watch::channel(reconciler.snapshot());
        let subscription = reconciler.start(move |view| {
            tx.send_replace(view.clone());
        })?;

        client.init().await;

        Ok(Self {
            client,
            reconciler,
            views,
            subscription,
        })
    }

    /// Wait until the current view satisfies `done`.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Timeout` if that does not happen in time.
    pub async fn wait_for(
        &mut self,
        done: impl FnMut(&SessionView) -> bool,
    ) -> Result<SessionView, CommandError> {
        let view = tokio::time::timeout(SETTLE_TIMEOUT, self.views.wait_for(done))
            .await
            .map_err(|_| CommandError::Timeout(SETTLE_TIMEOUT))?
            .map_err(|_| CommandError::Stopped)?;
        Ok(view.clone())
    }

    /// Wait until the session is resolved.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Timeout` if the session stays unresolved.
    pub async fn resolved(&mut self) -> Result<SessionView, CommandError> {
        self.wait_for(|view| !view.resolving).await
    }

    /// Stop the reconciler and the client's background refresh.
    pub fn close(self) {
        self.subscription.unsubscribe();
        self.client.dispose();
    }
}

/// One-line description of a session view.
#[must_use]
pub fn describe(view: &SessionView) -> String {
    match (&view.identity, view.resolving) {
        (_, true) => "resolving...".to_string(),
        (None, false) => "signed out".to_string(),
        (Some(identity), false) => {
            let mut line = format!("signed in as {} ({})", identity.display_label(), identity.uid);
            if identity.is_super_admin() {
                line.push_str(" [super admin]");
            }
            line
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use army_command_core::{Email, Identity};

    #[test]
    fn test_describe() {
        let resolving = SessionView {
            identity: None,
            resolving: true,
        };
        assert_eq!(describe(&resolving), "resolving...");

        let signed_out = SessionView {
            identity: None,
            resolving: false,
        };
        assert_eq!(describe(&signed_out), "signed out");

        let admin =
            Identity::new("uid-admin").with_email(Email::parse("0000-0000@army.bts").unwrap());
        let signed_in = SessionView {
            identity: Some(admin),
            resolving: false,
        };
        assert_eq!(
            describe(&signed_in),
            "signed in as Army-0000-0000 (uid-admin) [super admin]"
        );
    }
}
