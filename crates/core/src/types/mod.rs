//! Core types for Army Command.
//!
//! This module provides type-safe wrappers for the identity domain.

pub mod email;
pub mod id;
pub mod identity;
pub mod role;
pub mod service_number;

pub use email::{Email, EmailError};
pub use id::*;
pub use identity::Identity;
pub use role::Role;
pub use service_number::{SERVICE_EMAIL_DOMAIN, ServiceNumber, ServiceNumberError};
