//! Service number type.
//!
//! Members sign in with a service number of the form `DDDD-DDDD` instead of
//! an email. The identity service only understands emails, so each service
//! number maps onto `{number}@army.bts`.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::email::Email;

/// Domain of the synthetic email addresses backing service-number accounts.
pub const SERVICE_EMAIL_DOMAIN: &str = "army.bts";

/// Number of digits in a service number (excluding the dash).
const DIGITS: usize = 8;

/// Errors that can occur when parsing a [`ServiceNumber`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceNumberError {
    /// The input contained no digits at all.
    #[error("service number cannot be empty")]
    Empty,
    /// The input did not contain enough digits.
    #[error("service number must have 8 digits (format 0000-0000), got {0}")]
    TooShort(usize),
    /// The input is not in `DDDD-DDDD` form.
    #[error("invalid service number format, use 0000-0000 (e.g., 2470-0001)")]
    InvalidFormat,
}

/// A validated service number in canonical `DDDD-DDDD` form.
///
/// ## Examples
///
/// ```
/// use army_command_core::ServiceNumber;
///
/// let number = ServiceNumber::parse("2470-0001").unwrap();
/// assert_eq!(number.to_email().as_str(), "2470-0001@army.bts");
///
/// // Free-form input is normalized the way the login form formats it
/// assert_eq!(ServiceNumber::normalize("2470 0001"), "2470-0001");
/// assert!(ServiceNumber::parse("2470-01").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceNumber(String);

impl ServiceNumber {
    /// The reserved number whose holder is always an administrator.
    pub const SUPER_ADMIN: &str = "0000-0000";

    /// Format free-form input as it is typed: keep digits only, cap at eight,
    /// and insert the dash after the fourth digit.
    ///
    /// The result is not necessarily valid; short input stays short.
    #[must_use]
    pub fn normalize(input: &str) -> String {
        let digits: String = input
            .chars()
            .filter(char::is_ascii_digit)
            .take(DIGITS)
            .collect();

        if digits.len() > 4 {
            let (head, tail) = digits.split_at(4);
            format!("{head}-{tail}")
        } else {
            digits
        }
    }

    /// Parse a service number from user input.
    ///
    /// Input is normalized first, so `"24700001"` and `" 2470-0001 "` both
    /// parse to `2470-0001`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input has no digits or fewer than eight.
    pub fn parse(input: &str) -> Result<Self, ServiceNumberError> {
        let normalized = Self::normalize(input);
        let digit_count = normalized.chars().filter(char::is_ascii_digit).count();

        match digit_count {
            0 => Err(ServiceNumberError::Empty),
            n if n < DIGITS => Err(ServiceNumberError::TooShort(n)),
            _ => Ok(Self(normalized)),
        }
    }

    /// Parse a service number that must already be in canonical form.
    ///
    /// Used when reading the local part of an existing account email, where
    /// auto-formatting would hide corrupt data.
    ///
    /// # Errors
    ///
    /// Returns `ServiceNumberError::InvalidFormat` unless the input is exactly
    /// `DDDD-DDDD`.
    pub fn parse_strict(input: &str) -> Result<Self, ServiceNumberError> {
        let bytes = input.as_bytes();
        let well_formed = bytes.len() == DIGITS + 1
            && bytes
                .iter()
                .enumerate()
                .all(|(i, b)| if i == 4 { *b == b'-' } else { b.is_ascii_digit() });

        if well_formed {
            Ok(Self(input.to_owned()))
        } else {
            Err(ServiceNumberError::InvalidFormat)
        }
    }

    /// Extract the service number from an account email, if it is one of
    /// the synthetic `@army.bts` addresses.
    #[must_use]
    pub fn from_email(email: &Email) -> Option<Self> {
        if email.domain() != SERVICE_EMAIL_DOMAIN {
            return None;
        }
        Self::parse_strict(email.local_part()).ok()
    }

    /// The synthetic email address the identity service knows this member by.
    #[must_use]
    pub fn to_email(&self) -> Email {
        Email::from_trusted(format!("{}@{SERVICE_EMAIL_DOMAIN}", self.0))
    }

    /// Whether this is the reserved super-administrator number.
    #[must_use]
    pub fn is_super_admin(&self) -> bool {
        self.0 == Self::SUPER_ADMIN
    }

    /// Returns the service number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ServiceNumber {
    type Err = ServiceNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServiceNumber {
    type Error = ServiceNumberError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse_strict(&s)
    }
}

impl From<ServiceNumber> for String {
    fn from(number: ServiceNumber) -> Self {
        number.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_inserts_dash() {
        assert_eq!(ServiceNumber::normalize("24700001"), "2470-0001");
        assert_eq!(ServiceNumber::normalize("2470"), "2470");
        assert_eq!(ServiceNumber::normalize("24700"), "2470-0");
    }

    #[test]
    fn test_normalize_strips_non_digits_and_truncates() {
        assert_eq!(ServiceNumber::normalize("24a70-00 01"), "2470-0001");
        assert_eq!(ServiceNumber::normalize("2470000199"), "2470-0001");
        assert_eq!(ServiceNumber::normalize("abc"), "");
    }

    #[test]
    fn test_parse_accepts_loose_input() {
        let number = ServiceNumber::parse(" 2470 0001 ").unwrap();
        assert_eq!(number.as_str(), "2470-0001");
    }

    #[test]
    fn test_parse_rejects_short_and_empty() {
        assert_eq!(ServiceNumber::parse(""), Err(ServiceNumberError::Empty));
        assert_eq!(
            ServiceNumber::parse("2470-01"),
            Err(ServiceNumberError::TooShort(6))
        );
    }

    #[test]
    fn test_parse_strict() {
        assert!(ServiceNumber::parse_strict("9999-9999").is_ok());
        assert_eq!(
            ServiceNumber::parse_strict("99999999"),
            Err(ServiceNumberError::InvalidFormat)
        );
        assert_eq!(
            ServiceNumber::parse_strict("9999-999x"),
            Err(ServiceNumberError::InvalidFormat)
        );
    }

    #[test]
    fn test_email_round_trip() {
        let number = ServiceNumber::parse("2470-0002").unwrap();
        let email = number.to_email();
        assert_eq!(email.as_str(), "2470-0002@army.bts");
        assert_eq!(ServiceNumber::from_email(&email), Some(number));
    }

    #[test]
    fn test_from_email_ignores_other_domains() {
        let email = Email::parse("2470-0002@example.com").unwrap();
        assert_eq!(ServiceNumber::from_email(&email), None);

        let email = Email::parse("recruit@army.bts").unwrap();
        assert_eq!(ServiceNumber::from_email(&email), None);
    }

    #[test]
    fn test_super_admin() {
        assert!(ServiceNumber::parse("0000-0000").unwrap().is_super_admin());
        assert!(!ServiceNumber::parse("2470-0001").unwrap().is_super_admin());
    }

    #[test]
    fn test_deserialize_requires_canonical_form() {
        let parsed: ServiceNumber = serde_json::from_str("\"2470-0003\"").unwrap();
        assert_eq!(parsed.as_str(), "2470-0003");
        assert!(serde_json::from_str::<ServiceNumber>("\"24700003\"").is_err());
    }
}
