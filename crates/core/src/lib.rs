//! Army Command Core - Shared types library.
//!
//! This crate provides the types shared by all Army Command components:
//! - `session` - Session reconciliation and the identity provider client
//! - `cli` - Command-line login, logout, and session inspection
//!
//! # Architecture
//!
//! The core crate contains only types and validation - no I/O, no HTTP
//! clients, no timers. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Identities, user IDs, emails, service numbers, and roles

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
