//! Credential input for login and registration.

use secrecy::{ExposeSecret, SecretString};

use army_command_core::{Email, ServiceNumber};

use crate::error::AuthError;

/// Minimum password length accepted by the identity service.
const MIN_PASSWORD_LENGTH: usize = 6;

/// Email and password handed to the identity provider.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct Credentials {
    email: Email,
    password: SecretString,
}

impl Credentials {
    /// Credentials for an account addressed by email.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredential` if the email is malformed or
    /// the password is empty.
    pub fn email(email: &str, password: SecretString) -> Result<Self, AuthError> {
        let email = Email::parse(email)?;
        Self::new(email, password)
    }

    /// Credentials for a member signing in with their service number.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredential` if the service number is not
    /// `0000-0000` shaped or the password is empty.
    pub fn service_number(number: &str, password: SecretString) -> Result<Self, AuthError> {
        let number = ServiceNumber::parse(number)?;
        Self::new(number.to_email(), password)
    }

    fn new(email: Email, password: SecretString) -> Result<Self, AuthError> {
        if password.expose_secret().is_empty() {
            return Err(AuthError::InvalidCredential(
                "password cannot be empty".to_string(),
            ));
        }
        Ok(Self { email, password })
    }

    /// Check the password against the identity service's sign-up policy.
    ///
    /// Only registration enforces this; existing accounts may predate it.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredential` if the password is too short.
    pub fn validate_for_registration(&self) -> Result<(), AuthError> {
        let len = self.password.expose_secret().chars().count();
        if len < MIN_PASSWORD_LENGTH {
            return Err(AuthError::InvalidCredential(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        Ok(())
    }

    /// The account email.
    #[must_use]
    pub const fn account_email(&self) -> &Email {
        &self.email
    }

    /// The password.
    #[must_use]
    pub const fn password(&self) -> &SecretString {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_service_number_maps_to_email() {
        let creds = Credentials::service_number("24700001", SecretString::from("hunter22")).unwrap();
        assert_eq!(creds.account_email().as_str(), "2470-0001@army.bts");
    }

    #[test]
    fn test_malformed_service_number_is_invalid_credential() {
        let err = Credentials::service_number("12-34", SecretString::from("hunter22")).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[test]
    fn test_empty_password_rejected() {
        let err = Credentials::email("fan@example.com", SecretString::from("")).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[test]
    fn test_registration_password_policy() {
        let short = Credentials::email("fan@example.com", SecretString::from("abc")).unwrap();
        assert!(short.validate_for_registration().is_err());

        let ok = Credentials::email("fan@example.com", SecretString::from("abcdef")).unwrap();
        assert!(ok.validate_for_registration().is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::email("fan@example.com", SecretString::from("s3cr3t!")).unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("s3cr3t!"));
    }
}
