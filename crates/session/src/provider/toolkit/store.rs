//! Local persistence of identity-service credentials.
//!
//! Keeping the refresh token on disk lets a restarted process restore its
//! session instead of sending the member back to the login screen.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use army_command_core::Identity;

/// Errors reading or writing the credential file.
#[derive(Debug, Error)]
pub enum CredentialStoreError {
    /// Filesystem error.
    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but does not contain a stored session.
    #[error("credential store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A session that can be restored after a restart.
#[derive(Debug, Clone)]
pub struct StoredSession {
    /// The account the refresh token belongs to.
    pub identity: Identity,
    /// Long-lived refresh token.
    pub refresh_token: SecretString,
}

/// On-disk format.
#[derive(Serialize, Deserialize)]
struct StoredSessionFile {
    identity: Identity,
    refresh_token: String,
    saved_at: DateTime<Utc>,
}

/// Where persisted credentials live, if anywhere.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// Persist credentials to a JSON file at `path`.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Do not persist credentials; sessions end with the process.
    #[must_use]
    pub const fn ephemeral() -> Self {
        Self { path: None }
    }

    /// Load the persisted session, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(&self) -> Result<Option<StoredSession>, CredentialStoreError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: StoredSessionFile = serde_json::from_slice(&bytes)?;
        Ok(Some(StoredSession {
            identity: file.identity,
            refresh_token: SecretString::from(file.refresh_token),
        }))
    }

    /// Persist a session, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, session: &StoredSession) -> Result<(), CredentialStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_vec_pretty(&StoredSessionFile {
            identity: session.identity.clone(),
            refresh_token: session.refresh_token.expose_secret().to_owned(),
            saved_at: Utc::now(),
        })?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Remove the persisted session. Removing a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), CredentialStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restrict_permissions(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn session() -> StoredSession {
        StoredSession {
            identity: Identity::new("uid-1"),
            refresh_token: SecretString::from("refresh-abc"),
        }
    }

    #[test]
    fn test_missing_file_loads_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::file(temp_dir.path().join("credentials.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_clear() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::file(temp_dir.path().join("nested").join("credentials.json"));

        store.save(&session()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.identity, Identity::new("uid-1"));
        assert_eq!(loaded.refresh_token.expose_secret(), "refresh-abc");

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("credentials.json");
        std::fs::write(&path, b"[]").unwrap();

        let store = CredentialStore::file(path);
        assert!(matches!(store.load(), Err(CredentialStoreError::Corrupt(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("credentials.json");
        CredentialStore::file(&path).save(&session()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_ephemeral_store_is_inert() {
        let store = CredentialStore::ephemeral();
        store.save(&session()).unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }
}
