//! Durable credential storage.
//!
//! SYSTEM CONTEXT
//! ==============
//! The credential is the only piece of session data that survives a restart.
//! It lives under a single named entry scoped to the API origin; absence of
//! the entry means logged out. Profile and privilege data are always
//! re-derived from the network.

#[cfg(test)]
#[path = "storage_test.rs"]
mod storage_test;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StorageError;
use crate::net::types::Credential;

/// Name of the durable entry holding the credential.
pub const CREDENTIAL_KEY: &str = "token";

/// Origin-scoped durable storage for the session credential.
///
/// Implementations are synchronous: writes must be visible to the next
/// `load` on any thread before the call returns.
pub trait CredentialStore: Send + Sync {
    /// Read the stored credential, `None` when logged out.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn load(&self) -> Result<Option<Credential>, StorageError>;

    /// Replace the stored credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn save(&self, credential: &Credential) -> Result<(), StorageError>;

    /// Remove the stored credential. Clearing an empty store succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be modified.
    fn clear(&self) -> Result<(), StorageError>;
}

// =============================================================================
// MEMORY
// =============================================================================

/// Process-local store. Clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Arc<Mutex<Option<Credential>>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that starts out holding `credential`.
    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        Self { slot: Arc::new(Mutex::new(Some(credential))) }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>, StorageError> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

// =============================================================================
// FILE
// =============================================================================

/// One file per API origin: `<state_dir>/<origin-slug>/token`.
#[derive(Clone, Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store for `origin` under `state_dir`.
    #[must_use]
    pub fn new(state_dir: &Path, origin: &str) -> Self {
        Self { path: state_dir.join(origin_slug(origin)).join(CREDENTIAL_KEY) }
    }

    /// Store for `origin` under the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoStateDir`] when no home directory is known.
    pub fn in_default_dir(origin: &str) -> Result<Self, StorageError> {
        Ok(Self::new(&default_state_dir()?, origin))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let token = raw.trim();
                if token.is_empty() { Ok(None) } else { Ok(Some(Credential::new(token))) }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_private(&self.path, credential.as_str())?;
        tracing::debug!(path = %self.path.display(), "credential persisted");
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// Platform config directory for the client, e.g. `~/.config/aigen`.
///
/// # Errors
///
/// Returns [`StorageError::NoStateDir`] when no home directory is known.
pub fn default_state_dir() -> Result<PathBuf, StorageError> {
    let dirs = directories::ProjectDirs::from("com", "aigen", "aigen").ok_or(StorageError::NoStateDir)?;
    Ok(dirs.config_dir().to_path_buf())
}

/// Reduce an origin URL to a directory name: scheme dropped, anything outside
/// `[A-Za-z0-9.-]` replaced with `_`.
#[must_use]
pub fn origin_slug(origin: &str) -> String {
    let trimmed = origin.trim().trim_end_matches('/');
    let without_scheme = trimmed.split_once("://").map_or(trimmed, |(_, rest)| rest);
    let slug: String = without_scheme
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    if slug.is_empty() { "default".to_owned() } else { slug }
}
