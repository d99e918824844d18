//! Session configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `FIREBASE_API_KEY` - Web API key of the identity service project
//!
//! ## Optional
//! - `IDENTITY_TOOLKIT_URL` - Identity Toolkit base URL
//!   (default: `https://identitytoolkit.googleapis.com/v1`)
//! - `SECURE_TOKEN_URL` - Secure Token base URL
//!   (default: `https://securetoken.googleapis.com/v1`)
//! - `SESSION_RECOVERY_GRACE_MS` - How long a dropped session is presumed
//!   transient (default: 5000)
//! - `SESSION_RESTORE_GRACE_MS` - How long a cold start waits for a
//!   persisted session to be restored (default: 2000)
//! - `SESSION_STATE_DIR` - Directory for the intent marker and persisted
//!   credentials (default: `.army-command`)
//! - `PROFILE_SYNC_URL` - Save-user endpoint for background profile sync
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use crate::reconciler::GracePolicy;

const DEFAULT_IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const DEFAULT_SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";
const DEFAULT_STATE_DIR: &str = ".army-command";
const DEFAULT_RECOVERY_GRACE_MS: u64 = 5_000;
const DEFAULT_RESTORE_GRACE_MS: u64 = 2_000;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Session and identity provider configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identity service Web API key
    pub api_key: SecretString,
    /// Base URL of the Identity Toolkit REST API
    pub identity_toolkit_url: Url,
    /// Base URL of the Secure Token REST API
    pub secure_token_url: Url,
    /// Grace windows applied by the reconciler
    pub grace: GracePolicy,
    /// Directory holding `intent.json` and `credentials.json`
    pub state_dir: PathBuf,
    /// Save-user endpoint for background profile sync
    pub profile_sync_url: Option<Url>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl SessionConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid,
    /// or if the API key looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`SessionConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let api_key = env.validated_secret("FIREBASE_API_KEY")?;
        let identity_toolkit_url =
            env.url_or_default("IDENTITY_TOOLKIT_URL", DEFAULT_IDENTITY_TOOLKIT_URL)?;
        let secure_token_url = env.url_or_default("SECURE_TOKEN_URL", DEFAULT_SECURE_TOKEN_URL)?;

        let grace = GracePolicy {
            recovery: env.millis_or_default("SESSION_RECOVERY_GRACE_MS", DEFAULT_RECOVERY_GRACE_MS)?,
            restore: env.millis_or_default("SESSION_RESTORE_GRACE_MS", DEFAULT_RESTORE_GRACE_MS)?,
        };

        let state_dir = PathBuf::from(env.or_default("SESSION_STATE_DIR", DEFAULT_STATE_DIR));

        let profile_sync_url = env
            .optional("PROFILE_SYNC_URL")
            .map(|raw| parse_url("PROFILE_SYNC_URL", &raw))
            .transpose()?;

        Ok(Self {
            api_key,
            identity_toolkit_url,
            secure_token_url,
            grace,
            state_dir,
            profile_sync_url,
            sentry_dsn: env.optional("SENTRY_DSN"),
            sentry_environment: env.optional("SENTRY_ENVIRONMENT"),
        })
    }

    /// Path of the persisted intent marker.
    #[must_use]
    pub fn intent_path(&self) -> PathBuf {
        self.state_dir.join("intent.json")
    }

    /// Path of the persisted identity-service credentials.
    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir.join("credentials.json")
    }

    /// The API key, for building request URLs.
    pub(crate) fn expose_api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Get an optional variable, treating blank values as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Get a required variable.
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    /// Get a variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Load and validate a secret.
    fn validated_secret(&self, key: &str) -> Result<SecretString, ConfigError> {
        let value = self.required(key)?;
        validate_secret_strength(&value, key)?;
        Ok(SecretString::from(value))
    }

    fn url_or_default(&self, key: &str, default: &str) -> Result<Url, ConfigError> {
        parse_url(key, &self.or_default(key, default))
    }

    fn millis_or_default(&self, key: &str, default: u64) -> Result<Duration, ConfigError> {
        let Some(raw) = self.optional(key) else {
            return Ok(Duration::from_millis(default));
        };

        raw.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url =
        Url::parse(raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }

    Ok(url)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const API_KEY: &str = "AIzaSyD3x9Qm7Lk2Vb8Rt5Wn1Jh6Pc4Zf0Gs";

    fn load(vars: &[(&str, &str)]) -> Result<SessionConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        SessionConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("FIREBASE_API_KEY", API_KEY)]).unwrap();

        assert_eq!(
            config.identity_toolkit_url.as_str(),
            "https://identitytoolkit.googleapis.com/v1"
        );
        assert_eq!(config.grace.recovery, Duration::from_millis(5_000));
        assert_eq!(config.grace.restore, Duration::from_millis(2_000));
        assert_eq!(config.intent_path(), PathBuf::from(".army-command/intent.json"));
        assert!(config.profile_sync_url.is_none());
        assert_eq!(config.expose_api_key(), API_KEY);
    }

    #[test]
    fn test_missing_api_key() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "FIREBASE_API_KEY"));
    }

    #[test]
    fn test_placeholder_api_key_rejected() {
        let err = load(&[("FIREBASE_API_KEY", "your-api-key-here")]).unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_low_entropy_api_key_rejected() {
        let err = load(&[("FIREBASE_API_KEY", "aaaaaaaaaaaaaaaaaaaa")]).unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_grace_overrides() {
        let config = load(&[
            ("FIREBASE_API_KEY", API_KEY),
            ("SESSION_RECOVERY_GRACE_MS", "1500"),
            ("SESSION_RESTORE_GRACE_MS", " 250 "),
        ])
        .unwrap();

        assert_eq!(config.grace.recovery, Duration::from_millis(1_500));
        assert_eq!(config.grace.restore, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_grace_rejected() {
        let err = load(&[
            ("FIREBASE_API_KEY", API_KEY),
            ("SESSION_RECOVERY_GRACE_MS", "five seconds"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref key, _) if key == "SESSION_RECOVERY_GRACE_MS"));
    }

    #[test]
    fn test_profile_sync_url_must_be_http() {
        let config = load(&[
            ("FIREBASE_API_KEY", API_KEY),
            ("PROFILE_SYNC_URL", "https://army.example/api/save-user"),
        ])
        .unwrap();
        assert_eq!(
            config.profile_sync_url.unwrap().path(),
            "/api/save-user"
        );

        let err = load(&[
            ("FIREBASE_API_KEY", API_KEY),
            ("PROFILE_SYNC_URL", "ftp://army.example/save"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = load(&[("FIREBASE_API_KEY", API_KEY), ("SESSION_STATE_DIR", "  ")]).unwrap();
        assert_eq!(config.state_dir, PathBuf::from(".army-command"));
    }

    #[test]
    fn test_shannon_entropy() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
    }
}
