//! Identity Toolkit and Secure Token REST calls.
//!
//! Password sign-in and sign-up return an ID token (short-lived JWT) and a
//! refresh token. The refresh token is exchanged for a new ID token before
//! the old one expires.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use army_command_core::{Email, Identity};

use crate::config::SessionConfig;
use crate::credentials::Credentials;
use crate::error::AuthError;

const SIGN_IN_PATH: &str = "accounts:signInWithPassword";
const SIGN_UP_PATH: &str = "accounts:signUp";
const TOKEN_PATH: &str = "token";

/// Base URLs and API key for the REST endpoints.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct Endpoints {
    identity_toolkit: String,
    secure_token: String,
    api_key: SecretString,
}

impl Endpoints {
    /// Endpoints for the configured project.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.identity_toolkit_url.as_str(),
            config.secure_token_url.as_str(),
            SecretString::from(config.expose_api_key().to_owned()),
        )
    }

    /// Endpoints rooted at explicit base URLs.
    #[must_use]
    pub fn new(identity_toolkit: &str, secure_token: &str, api_key: SecretString) -> Self {
        Self {
            identity_toolkit: identity_toolkit.trim_end_matches('/').to_owned(),
            secure_token: secure_token.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    fn toolkit(&self, path: &str) -> String {
        format!("{}/{path}", self.identity_toolkit)
    }

    fn token(&self) -> String {
        format!("{}/{TOKEN_PATH}", self.secure_token)
    }

    fn key(&self) -> [(&'static str, &str); 1] {
        [("key", self.api_key.expose_secret())]
    }
}

impl std::fmt::Debug for Endpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoints")
            .field("identity_toolkit", &self.identity_toolkit)
            .field("secure_token", &self.secure_token)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Tokens issued for a signed-in account.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    /// The account the tokens belong to.
    pub identity: Identity,
    /// Short-lived bearer token.
    pub id_token: SecretString,
    /// Long-lived token used to mint new ID tokens.
    pub refresh_token: SecretString,
    /// Unix timestamp when the ID token expires.
    pub expires_at: i64,
}

/// Request body for password sign-in and sign-up.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

/// Response from password sign-in and sign-up.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    /// Token lifetime in seconds, as a decimal string.
    expires_in: String,
}

/// Response from the secure token endpoint.
#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    user_id: String,
}

/// Error envelope shared by both APIs.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Sign in with email and password.
///
/// # Errors
///
/// Returns `AuthError::InvalidCredential` for unknown accounts or wrong
/// passwords, `AuthError::ProviderUnavailable` for transport failures.
#[instrument(skip(client, endpoints, credentials), fields(email = %credentials.account_email()))]
pub async fn sign_in_with_password(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    credentials: &Credentials,
) -> Result<TokenGrant, AuthError> {
    password_call(client, endpoints, SIGN_IN_PATH, credentials).await
}

/// Create an account with email and password.
///
/// # Errors
///
/// Returns `AuthError::AccountConflict` if the email is already registered.
#[instrument(skip(client, endpoints, credentials), fields(email = %credentials.account_email()))]
pub async fn sign_up(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    credentials: &Credentials,
) -> Result<TokenGrant, AuthError> {
    password_call(client, endpoints, SIGN_UP_PATH, credentials).await
}

async fn password_call(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    path: &str,
    credentials: &Credentials,
) -> Result<TokenGrant, AuthError> {
    let now = chrono::Utc::now().timestamp();

    let response = client
        .post(endpoints.toolkit(path))
        .query(&endpoints.key())
        .json(&PasswordRequest {
            email: credentials.account_email().as_str(),
            password: credentials.password().expose_secret(),
            return_secure_token: true,
        })
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let body: PasswordResponse = response
        .json()
        .await
        .map_err(|e| AuthError::ProviderUnavailable(format!("malformed response: {e}")))?;

    let email = match body.email.as_deref() {
        Some(raw) => Some(Email::parse(raw)?),
        None => Some(credentials.account_email().clone()),
    };

    Ok(TokenGrant {
        identity: Identity {
            uid: body.local_id.into(),
            display_name: body.display_name.filter(|n| !n.is_empty()),
            email,
        },
        id_token: SecretString::from(body.id_token),
        refresh_token: SecretString::from(body.refresh_token),
        expires_at: now + parse_lifetime(&body.expires_in)?,
    })
}

/// Exchange a refresh token for a fresh ID token.
///
/// The refresh endpoint does not return profile fields, so the caller passes
/// the identity the token was issued for.
///
/// # Errors
///
/// Returns `AuthError::InvalidCredential` if the service rejected the refresh
/// token (revoked, expired, account disabled or deleted): the session is
/// over. Returns `AuthError::ProviderUnavailable` if the service could not be
/// reached: the session may still be recoverable.
#[instrument(skip(client, endpoints, identity, refresh_token), fields(uid = %identity.uid))]
pub async fn refresh_id_token(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    identity: &Identity,
    refresh_token: &SecretString,
) -> Result<TokenGrant, AuthError> {
    let now = chrono::Utc::now().timestamp();

    let response = client
        .post(endpoints.token())
        .query(&endpoints.key())
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let body: RefreshResponse = response
        .json()
        .await
        .map_err(|e| AuthError::ProviderUnavailable(format!("malformed response: {e}")))?;

    if body.user_id != identity.uid.as_str() {
        return Err(AuthError::InvalidCredential(
            "refresh token belongs to a different account".to_string(),
        ));
    }

    Ok(TokenGrant {
        identity: identity.clone(),
        id_token: SecretString::from(body.id_token),
        refresh_token: SecretString::from(body.refresh_token),
        expires_at: now + parse_lifetime(&body.expires_in)?,
    })
}

fn parse_lifetime(raw: &str) -> Result<i64, AuthError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AuthError::ProviderUnavailable(format!("malformed token lifetime '{raw}'")))
}

async fn error_from_response(response: reqwest::Response) -> AuthError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<ErrorEnvelope>(&text)
        .map(|envelope| envelope.error.message)
        .ok();

    match message {
        Some(message) if status.is_client_error() => classify_error(&message),
        Some(message) => AuthError::ProviderUnavailable(format!("HTTP {status}: {message}")),
        None => AuthError::ProviderUnavailable(format!("HTTP {status}")),
    }
}

/// Map an identity service error message to an [`AuthError`].
///
/// Messages look like `EMAIL_EXISTS` or
/// `WEAK_PASSWORD : Password should be at least 6 characters`.
pub(crate) fn classify_error(message: &str) -> AuthError {
    let (code, detail) = match message.split_once(':') {
        Some((code, detail)) => (code.trim(), Some(detail.trim())),
        None => (message.trim(), None),
    };

    match code {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            AuthError::InvalidCredential("invalid service number or password".to_string())
        }
        "EMAIL_EXISTS" => AuthError::AccountConflict,
        "USER_DISABLED" => AuthError::InvalidCredential("account disabled".to_string()),
        "WEAK_PASSWORD" => AuthError::InvalidCredential(
            detail.unwrap_or("password too weak").to_string(),
        ),
        "TOKEN_EXPIRED"
        | "INVALID_REFRESH_TOKEN"
        | "INVALID_ID_TOKEN"
        | "USER_NOT_FOUND"
        | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN"
        | "INVALID_EMAIL"
        | "MISSING_PASSWORD" => AuthError::InvalidCredential(code.to_lowercase().replace('_', " ")),
        "TOO_MANY_ATTEMPTS_TRY_LATER" | "QUOTA_EXCEEDED" => {
            AuthError::ProviderUnavailable("too many attempts, try again later".to_string())
        }
        // Configuration problems (bad API key, unknown project) say nothing
        // about the member's credentials
        _ => AuthError::ProviderUnavailable(format!("identity service error: {message}")),
    }
}
