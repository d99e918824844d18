//! Session error types.

use thiserror::Error;

use army_command_core::{EmailError, ServiceNumberError};

/// Errors surfaced by explicit authentication actions (`login`, `register`,
/// `logout`) and reported by identity providers.
///
/// Errors observed on the passive identity event stream are never returned
/// to anyone; they are logged and the last good session state is kept.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Malformed or mismatched login input (wrong password, unknown account,
    /// badly formatted service number, disabled account).
    #[error("invalid credentials: {0}")]
    InvalidCredential(String),

    /// Registration attempted with an identifier that is already in use.
    #[error("this service number is already active")]
    AccountConflict,

    /// The identity service could not be reached or failed to answer.
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl AuthError {
    /// Whether the failure is transient and the call may be retried as-is.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }
}

impl From<EmailError> for AuthError {
    fn from(err: EmailError) -> Self {
        Self::InvalidCredential(err.to_string())
    }
}

impl From<ServiceNumberError> for AuthError {
    fn from(err: ServiceNumberError) -> Self {
        Self::InvalidCredential(err.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::ProviderUnavailable(err.to_string())
    }
}

/// Errors from managing the reconciler itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// `start` was called on a reconciler that has already been started.
    #[error("session reconciler already started")]
    AlreadyStarted,
}
