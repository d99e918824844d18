//! Community roles.

use serde::{Deserialize, Serialize};

use super::service_number::ServiceNumber;

/// Role of a community member.
///
/// The authoritative role lives in the member's profile document; this type
/// only covers what can be derived without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    /// Role implied by a service number alone.
    ///
    /// The reserved super-admin number is always an administrator; everyone
    /// else starts as a regular user.
    #[must_use]
    pub fn for_service_number(number: Option<&ServiceNumber>) -> Self {
        if number.is_some_and(ServiceNumber::is_super_admin) {
            Self::Admin
        } else {
            Self::User
        }
    }

    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_role_for_service_number() {
        let admin = ServiceNumber::parse("0000-0000").unwrap();
        let member = ServiceNumber::parse("2470-0001").unwrap();

        assert_eq!(Role::for_service_number(Some(&admin)), Role::Admin);
        assert_eq!(Role::for_service_number(Some(&member)), Role::User);
        assert_eq!(Role::for_service_number(None), Role::User);
    }

    #[test]
    fn test_role_serde_names() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }
}
