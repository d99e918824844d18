//! Authenticated identity as reported by the identity provider.

use serde::{Deserialize, Serialize};

use super::email::Email;
use super::id::UserId;
use super::role::Role;
use super::service_number::ServiceNumber;

/// Who is logged in.
///
/// Owned by the identity provider. Session code may cache a copy to bridge
/// connection drops, but never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable unique identifier issued by the provider.
    pub uid: UserId,
    /// Optional display handle chosen by the member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Optional contact address (synthetic for service-number accounts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Email>,
}

impl Identity {
    /// Create an identity with only a uid.
    #[must_use]
    pub fn new(uid: impl Into<UserId>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            email: None,
        }
    }

    /// Set the contact email.
    #[must_use]
    pub fn with_email(mut self, email: Email) -> Self {
        self.email = Some(email);
        self
    }

    /// Set the display handle.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// The member's service number, when the account email is a service
    /// number address.
    #[must_use]
    pub fn service_number(&self) -> Option<ServiceNumber> {
        self.email.as_ref().and_then(ServiceNumber::from_email)
    }

    /// Whether this member holds the reserved super-admin service number.
    #[must_use]
    pub fn is_super_admin(&self) -> bool {
        self.role() == Role::Admin
    }

    /// Role derivable from the identity alone.
    #[must_use]
    pub fn role(&self) -> Role {
        Role::for_service_number(self.service_number().as_ref())
    }

    /// Label to show for this member.
    ///
    /// Falls back to `Army-{service number}`, then to `Army-` plus the first
    /// four characters of the uid.
    #[must_use]
    pub fn display_label(&self) -> String {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_owned();
        }

        match self.service_number() {
            Some(number) => format!("Army-{number}"),
            None => {
                let prefix: String = self.uid.as_str().chars().take(4).collect();
                format!("Army-{prefix}")
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn service_identity(number: &str) -> Identity {
        let number = ServiceNumber::parse(number).unwrap();
        Identity::new("uid-12345").with_email(number.to_email())
    }

    #[test]
    fn test_service_number_from_email() {
        let identity = service_identity("2470-0001");
        assert_eq!(
            identity.service_number().map(|n| n.to_string()),
            Some("2470-0001".to_string())
        );

        let plain = Identity::new("uid").with_email(Email::parse("fan@example.com").unwrap());
        assert!(plain.service_number().is_none());
        assert!(Identity::new("uid").service_number().is_none());
    }

    #[test]
    fn test_super_admin_detection() {
        assert!(service_identity("0000-0000").is_super_admin());
        assert!(!service_identity("9999-9999").is_super_admin());
        assert_eq!(service_identity("0000-0000").role(), Role::Admin);
    }

    #[test]
    fn test_display_label_fallbacks() {
        let named = service_identity("2470-0001").with_display_name("Purple Heart");
        assert_eq!(named.display_label(), "Purple Heart");

        assert_eq!(service_identity("2470-0001").display_label(), "Army-2470-0001");

        let blank = Identity::new("abcdefgh").with_display_name("  ");
        assert_eq!(blank.display_label(), "Army-abcd");
    }

    #[test]
    fn test_serde_skips_missing_fields() {
        let json = serde_json::to_string(&Identity::new("u1")).unwrap();
        assert_eq!(json, r#"{"uid":"u1"}"#);

        let parsed: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Identity::new("u1"));
    }
}
