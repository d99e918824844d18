//! Background profile sync.
//!
//! After each sign-in the member's profile document is created or touched
//! (last login, admin role upgrade) by the save-user endpoint. The sync is
//! fire-and-forget: its outcome never affects the session.

use futures::future::BoxFuture;
use secrecy::ExposeSecret;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use army_command_core::Identity;

use crate::provider::IdentityToolkitClient;

/// Errors from a profile sync attempt.
#[derive(Debug, Error)]
pub enum ProfileSyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("profile sync rejected with status {0}")]
    Rejected(reqwest::StatusCode),

    #[error("no ID token available for profile sync")]
    NoToken,
}

/// Upserts a member's profile after sign-in.
pub trait ProfileSync: Send + Sync {
    /// Sync the profile of a freshly signed-in identity.
    fn sync(&self, identity: Identity) -> BoxFuture<'static, Result<(), ProfileSyncError>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveUserRequest {
    service_number: String,
}

/// Calls the save-user endpoint with the member's bearer token.
///
/// Only identities signed in by service number have a profile to sync;
/// others are skipped.
#[derive(Clone)]
pub struct SaveUserEndpoint {
    http: reqwest::Client,
    url: Url,
    tokens: IdentityToolkitClient,
}

impl SaveUserEndpoint {
    #[must_use]
    pub fn new(url: Url, tokens: IdentityToolkitClient) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            tokens,
        }
    }
}

impl std::fmt::Debug for SaveUserEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveUserEndpoint")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl ProfileSync for SaveUserEndpoint {
    fn sync(&self, identity: Identity) -> BoxFuture<'static, Result<(), ProfileSyncError>> {
        let endpoint = self.clone();
        Box::pin(async move { endpoint.save_user(&identity).await })
    }
}

impl SaveUserEndpoint {
    #[instrument(skip(self, identity), fields(uid = %identity.uid))]
    async fn save_user(&self, identity: &Identity) -> Result<(), ProfileSyncError> {
        let Some(service_number) = identity.service_number() else {
            debug!("Identity has no service number, skipping profile sync");
            return Ok(());
        };

        let token = self
            .tokens
            .current_id_token()
            .await
            .ok_or(ProfileSyncError::NoToken)?;

        let response = self
            .http
            .post(self.url.clone())
            .bearer_auth(token.expose_secret())
            .json(&SaveUserRequest {
                service_number: service_number.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProfileSyncError::Rejected(status));
        }

        info!(service_number = %service_number, "Profile synced");
        Ok(())
    }
}
