//! Device identity source
//!
//! A client's identity is resolved once per connection request and reused
//! across retry attempts. [`FileIdentity`] keeps it stable across sessions
//! on the same device; [`MemoryIdentity`] backs tests and embedded use.

use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of a stable per-device identifier
pub trait IdentityProvider: Send + Sync {
    /// Return the device ID, generating and persisting one if absent
    fn get_or_create_device_id(&self) -> Result<String>;
}

/// File-backed device identity
///
/// Stores a uuid-v4 in a small text file; subsequent calls on the same
/// device return the stored value.
pub struct FileIdentity {
    path: PathBuf,
}

impl FileIdentity {
    /// Create a provider over an explicit storage path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a provider over the platform data directory
    pub fn in_default_location() -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| Error::IdentityError("No platform data directory".to_string()))?;
        Ok(Self::new(base.join("peerlink").join("device-id")))
    }

    /// Storage path of this provider
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityProvider for FileIdentity {
    fn get_or_create_device_id(&self) -> Result<String> {
        if let Ok(existing) = fs::read_to_string(&self.path) {
            let trimmed = existing.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }

        let id = uuid::Uuid::new_v4().to_string();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::IdentityError(format!("Cannot create {:?}: {}", parent, e)))?;
        }
        fs::write(&self.path, &id)
            .map_err(|e| Error::IdentityError(format!("Cannot write {:?}: {}", self.path, e)))?;

        debug!(path = ?self.path, "Generated new device identity");
        Ok(id)
    }
}

/// In-memory device identity with a fixed value
pub struct MemoryIdentity {
    id: String,
}

impl MemoryIdentity {
    /// Use a caller-chosen identifier
    pub fn fixed(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Generate a random identifier for this process
    pub fn random() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl IdentityProvider for MemoryIdentity {
    fn get_or_create_device_id(&self) -> Result<String> {
        Ok(self.id.clone())
    }
}
