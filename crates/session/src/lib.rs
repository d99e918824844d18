//! Army Command Session - resilient session reconciliation.
//!
//! The hosted identity service reports "no identity" whenever its connection
//! hiccups, not only on sign-out. This crate turns that noisy stream into a
//! stable answer to "who is signed in", and provides the client that talks
//! to the identity service.
//!
//! # Components
//!
//! - [`reconciler`] - The session state machine and its event loop
//! - [`intent`] - Durable "the member meant to be signed in" flag
//! - [`provider`] - Identity provider boundary and the REST client
//! - [`profile`] - Background profile sync after sign-in
//! - [`config`] - Environment configuration
//!
//! # Wiring
//!
//! ```rust,ignore
//! let config = SessionConfig::from_env()?;
//! let client = IdentityToolkitClient::new(&config);
//! let intent = FileIntentMarker::open(config.intent_path());
//!
//! let reconciler = SessionReconciler::new(client.clone(), intent, config.grace);
//! let _subscription = reconciler.start(|view| println!("{view:?}"))?;
//! client.init().await;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod credentials;
pub mod error;
pub mod intent;
pub mod profile;
pub mod provider;
pub mod reconciler;

pub use config::{ConfigError, SessionConfig};
pub use credentials::Credentials;
pub use error::{AuthError, SessionError};
pub use intent::{FileIntentMarker, IntentMarker, MemoryIntentMarker};
pub use profile::{ProfileSync, ProfileSyncError, SaveUserEndpoint};
pub use provider::{
    IdentityBroadcaster, IdentityEvent, IdentityProvider, IdentitySubscription,
    IdentityToolkitClient,
};
pub use reconciler::{GracePolicy, SessionReconciler, SessionSubscription, SessionView};
