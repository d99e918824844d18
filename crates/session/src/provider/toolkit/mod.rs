//! REST client for the hosted identity service.
//!
//! # Lifecycle
//!
//! 1. Construct with [`IdentityToolkitClient::new`] (no I/O)
//! 2. Call [`IdentityToolkitClient::init`] to restore a persisted session;
//!    this resolves the initial identity state for subscribers
//! 3. Sign in, sign up, sign out; the client emits identity events
//! 4. Call [`IdentityToolkitClient::dispose`] to stop background refresh
//!
//! # Token refresh
//!
//! ID tokens live for an hour. A background task refreshes them five minutes
//! before expiry. If the service cannot be reached the task retries with
//! capped exponential backoff; once the ID token has actually expired it
//! reports "no identity" until a refresh succeeds. That report is a dropped
//! connection, not a sign-out, and the session reconciler treats it so.

pub mod api;
pub mod store;

pub use api::{Endpoints, TokenGrant};
pub use store::{CredentialStore, CredentialStoreError, StoredSession};

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use rand::Rng;
use secrecy::SecretString;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use army_command_core::Identity;

use super::{IdentityBroadcaster, IdentityProvider, IdentitySubscription};
use crate::config::SessionConfig;
use crate::credentials::Credentials;
use crate::error::AuthError;

/// Refresh the ID token this long before it expires.
const REFRESH_MARGIN_SECS: i64 = 300;
/// First retry delay after a failed refresh.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Retry delay cap.
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Upper bound of the random jitter added to each retry.
const MAX_JITTER_MS: u64 = 250;

/// Client for the hosted identity service.
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct IdentityToolkitClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    endpoints: Endpoints,
    store: CredentialStore,
    /// In-memory token cache
    session: RwLock<Option<ActiveSession>>,
    events: IdentityBroadcaster,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

/// The signed-in account and its tokens.
struct ActiveSession {
    identity: Identity,
    id_token: SecretString,
    refresh_token: SecretString,
    expires_at: i64,
    /// Whether "no identity" has been reported because refresh kept failing.
    dropped: bool,
}

impl ActiveSession {
    fn from_grant(grant: TokenGrant) -> Self {
        Self {
            identity: grant.identity,
            id_token: grant.id_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_at,
            dropped: false,
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    fn refresh_due_in(&self, now: i64) -> Duration {
        let secs = (self.expires_at - REFRESH_MARGIN_SECS - now).max(0);
        Duration::from_secs(secs.unsigned_abs())
    }
}

impl IdentityToolkitClient {
    /// Create a client for the configured project.
    ///
    /// Persists credentials under the configured state directory.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created. This should never happen
    /// under normal circumstances as we use standard TLS configuration.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_parts(
            Endpoints::from_config(config),
            CredentialStore::file(config.credentials_path()),
        )
    }

    /// Create a client from explicit endpoints and credential store.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn with_parts(endpoints: Endpoints, store: CredentialStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            inner: Arc::new(ClientInner {
                http,
                endpoints,
                store,
                session: RwLock::new(None),
                events: IdentityBroadcaster::new(),
                refresher: Mutex::new(None),
            }),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restore a persisted session and resolve the initial identity state.
    ///
    /// Never fails: problems with the persisted session are logged and the
    /// client starts signed out, or keeps retrying in the background if the
    /// service was merely unreachable.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Option<Identity> {
        let stored = match self.inner.store.load() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable persisted session");
                self.clear_store();
                None
            }
        };

        let Some(stored) = stored else {
            debug!("No persisted session");
            self.inner.events.publish(None);
            return None;
        };

        let result = api::refresh_id_token(
            &self.inner.http,
            &self.inner.endpoints,
            &stored.identity,
            &stored.refresh_token,
        )
        .await;

        match result {
            Ok(grant) => {
                info!(uid = %grant.identity.uid, "Restored persisted session");
                let identity = grant.identity.clone();
                self.establish(grant).await;
                Some(identity)
            }
            Err(AuthError::ProviderUnavailable(reason)) => {
                warn!(
                    uid = %stored.identity.uid,
                    reason = %reason,
                    "Identity service unreachable, will keep retrying session restore"
                );
                *self.inner.session.write().await = Some(ActiveSession {
                    identity: stored.identity,
                    id_token: SecretString::from(String::new()),
                    refresh_token: stored.refresh_token,
                    expires_at: 0,
                    dropped: true,
                });
                self.inner.events.publish(None);
                self.spawn_refresher();
                None
            }
            Err(e) => {
                info!(uid = %stored.identity.uid, error = %e, "Persisted session was revoked");
                self.clear_store();
                self.inner.events.publish(None);
                None
            }
        }
    }

    /// Stop background token refresh.
    ///
    /// The session itself is kept; a later `init` resumes it.
    pub fn dispose(&self) {
        self.abort_refresher();
        debug!("Identity client disposed");
    }

    // =========================================================================
    // Session access
    // =========================================================================

    /// The current bearer token, if the session is usable.
    pub async fn current_id_token(&self) -> Option<SecretString> {
        let now = chrono::Utc::now().timestamp();
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .filter(|s| !s.dropped && !s.is_expired(now))
            .map(|s| s.id_token.clone())
    }

    /// The currently signed-in identity, if the session is usable.
    pub async fn current_identity(&self) -> Option<Identity> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .filter(|s| !s.dropped)
            .map(|s| s.identity.clone())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn establish(&self, grant: TokenGrant) {
        let stored = StoredSession {
            identity: grant.identity.clone(),
            refresh_token: grant.refresh_token.clone(),
        };
        if let Err(e) = self.inner.store.save(&stored) {
            warn!(error = %e, "Failed to persist session, it will not survive a restart");
        }

        let identity = grant.identity.clone();
        *self.inner.session.write().await = Some(ActiveSession::from_grant(grant));
        self.inner.events.publish(Some(identity));
        self.spawn_refresher();
    }

    fn clear_store(&self) {
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
    }

    fn spawn_refresher(&self) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(refresh_loop(weak));

        let previous = self
            .inner
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn abort_refresher(&self) {
        let handle = self
            .inner
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl IdentityProvider for IdentityToolkitClient {
    fn subscribe(&self) -> IdentitySubscription {
        self.inner.events.subscribe()
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.account_email()))]
    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let grant =
            api::sign_in_with_password(&self.inner.http, &self.inner.endpoints, credentials)
                .await?;

        info!(uid = %grant.identity.uid, "Signed in");
        let identity = grant.identity.clone();
        self.establish(grant).await;
        Ok(identity)
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.account_email()))]
    async fn sign_up(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        credentials.validate_for_registration()?;

        let grant = api::sign_up(&self.inner.http, &self.inner.endpoints, credentials).await?;

        info!(uid = %grant.identity.uid, "Registered account");
        let identity = grant.identity.clone();
        self.establish(grant).await;
        Ok(identity)
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), AuthError> {
        self.abort_refresher();
        let previous = self.inner.session.write().await.take();
        self.inner.events.publish(None);

        if let Some(previous) = previous {
            info!(uid = %previous.identity.uid, "Signed out");
        }

        self.inner.store.clear().map_err(|e| {
            AuthError::ProviderUnavailable(format!("failed to clear persisted credentials: {e}"))
        })
    }
}

// =============================================================================
// Background refresh
// =============================================================================

/// What the refresh loop should do after one attempt.
enum RefreshOutcome {
    Refreshed,
    Retry,
    SessionEnded,
}

async fn refresh_loop(inner: Weak<ClientInner>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let wait = {
            let Some(inner) = inner.upgrade() else { return };
            let now = chrono::Utc::now().timestamp();
            let session = inner.session.read().await;
            match session.as_ref() {
                Some(session) => session.refresh_due_in(now),
                None => return,
            }
        };

        tokio::time::sleep(wait).await;

        let Some(client) = inner.upgrade() else { return };
        match refresh_once(&client).await {
            RefreshOutcome::Refreshed => backoff = INITIAL_BACKOFF,
            RefreshOutcome::SessionEnded => return,
            RefreshOutcome::Retry => {
                drop(client);
                let jitter = Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS));
                tokio::time::sleep(backoff + jitter).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn refresh_once(inner: &ClientInner) -> RefreshOutcome {
    let (identity, refresh_token) = {
        let session = inner.session.read().await;
        let Some(session) = session.as_ref() else {
            return RefreshOutcome::SessionEnded;
        };
        (session.identity.clone(), session.refresh_token.clone())
    };

    let result = api::refresh_id_token(&inner.http, &inner.endpoints, &identity, &refresh_token).await;

    match result {
        Ok(grant) => {
            let mut session = inner.session.write().await;
            let recovered = session.as_ref().is_some_and(|s| s.dropped);
            if let Err(e) = inner.store.save(&StoredSession {
                identity: grant.identity.clone(),
                refresh_token: grant.refresh_token.clone(),
            }) {
                warn!(error = %e, "Failed to persist refreshed session");
            }
            *session = Some(ActiveSession::from_grant(grant));
            drop(session);

            if recovered {
                info!(uid = %identity.uid, "Identity service reachable again, session recovered");
                inner.events.publish(Some(identity));
            } else {
                debug!(uid = %identity.uid, "Refreshed ID token");
            }
            RefreshOutcome::Refreshed
        }
        Err(AuthError::ProviderUnavailable(reason)) => {
            let now = chrono::Utc::now().timestamp();
            let mut session = inner.session.write().await;
            let Some(active) = session.as_mut() else {
                return RefreshOutcome::SessionEnded;
            };

            if active.is_expired(now) && !active.dropped {
                active.dropped = true;
                drop(session);
                warn!(uid = %identity.uid, reason = %reason, "ID token expired and refresh failed, reporting session lost");
                inner.events.publish(None);
            } else if !active.dropped {
                drop(session);
                warn!(uid = %identity.uid, reason = %reason, "Token refresh failed, will retry");
                inner.events.publish_error(AuthError::ProviderUnavailable(reason));
            }
            RefreshOutcome::Retry
        }
        Err(e) => {
            info!(uid = %identity.uid, error = %e, "Refresh token rejected, session ended");
            *inner.session.write().await = None;
            if let Err(e) = inner.store.clear() {
                warn!(error = %e, "Failed to clear persisted session");
            }
            inner.events.publish(None);
            RefreshOutcome::SessionEnded
        }
    }
}
