//! Persistent session intent marker.
//!
//! Records whether the user's last explicit action was "log in" or
//! "log out". The reconciler reads it to tell a dropped connection apart from
//! a real sign-out, so it must survive restarts.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Durable "the user intends to be logged in" flag.
///
/// Writes are idempotent and last-write-wins. Implementations never fail
/// visibly: a marker that cannot be persisted still answers from memory.
pub trait IntentMarker: Send + Sync + 'static {
    /// Whether the user intends to be logged in.
    fn get(&self) -> bool;

    /// Record the user's intent.
    fn set(&self, intends_login: bool);

    /// Forget any recorded intent (equivalent to `set(false)`).
    fn clear(&self) {
        self.set(false);
    }
}

impl<T: IntentMarker> IntentMarker for std::sync::Arc<T> {
    fn get(&self) -> bool {
        (**self).get()
    }

    fn set(&self, intends_login: bool) {
        (**self).set(intends_login);
    }

    fn clear(&self) {
        (**self).clear();
    }
}

// =============================================================================
// In-memory marker
// =============================================================================

/// Process-local marker, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryIntentMarker {
    value: Mutex<bool>,
}

impl MemoryIntentMarker {
    /// Create a marker with an initial value.
    #[must_use]
    pub const fn new(intends_login: bool) -> Self {
        Self {
            value: Mutex::new(intends_login),
        }
    }
}

impl IntentMarker for MemoryIntentMarker {
    fn get(&self) -> bool {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, intends_login: bool) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = intends_login;
    }
}

// =============================================================================
// File-backed marker
// =============================================================================

/// On-disk format of the marker file.
#[derive(Debug, Serialize, Deserialize)]
struct MarkerFile {
    intends_login: bool,
    updated_at: DateTime<Utc>,
}

/// Marker persisted as a small JSON file.
///
/// The value is loaded once at construction and cached. A missing or
/// unreadable file reads as "no intent".
#[derive(Debug)]
pub struct FileIntentMarker {
    path: PathBuf,
    value: Mutex<bool>,
}

impl FileIntentMarker {
    /// Open (or lazily create) the marker at `path`.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let value = read_marker(&path);
        debug!(path = %path.display(), intends_login = value, "Loaded session intent marker");

        Self {
            path,
            value: Mutex::new(value),
        }
    }

    /// Location of the marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, intends_login: bool) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_vec(&MarkerFile {
            intends_login,
            updated_at: Utc::now(),
        })?;

        // Write-then-rename so a crash never leaves a torn file behind
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl IntentMarker for FileIntentMarker {
    fn get(&self) -> bool {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, intends_login: bool) {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *value = intends_login;

        if let Err(e) = self.persist(intends_login) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to persist session intent marker"
            );
        }
    }
}

fn read_marker(path: &Path) -> bool {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read session intent marker");
            return false;
        }
    };

    match serde_json::from_slice::<MarkerFile>(&bytes) {
        Ok(marker) => marker.intends_login,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring corrupt session intent marker");
            false
        }
    }
}
