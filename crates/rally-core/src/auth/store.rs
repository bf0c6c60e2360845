//! Persisted session and local role hint.

use std::path::{Path, PathBuf};

use anyhow::Result;
use rally_types::{Role, Session};
use serde::{Deserialize, Serialize};

use crate::config::paths;
use crate::storage;

/// Provider session file (`$RALLY_HOME/session.json`).
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location under `$RALLY_HOME`.
    pub fn default_location() -> Self {
        Self::new(paths::session_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    /// Returns an error if the file exists but is unreadable.
    pub fn load(&self) -> Result<Option<Session>> {
        storage::load_json(&self.path)
    }

    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, session: &Session) -> Result<()> {
        storage::save_json(&self.path, &Some(session))
    }

    /// # Errors
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<bool> {
        storage::remove(&self.path)
    }
}

/// Role chosen locally for a subject. Advisory only, never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleHint {
    pub subject: String,
    pub role: Role,
}

/// Local role hint file (`$RALLY_HOME/role_hint.json`).
#[derive(Debug, Clone)]
pub struct RoleHintStore {
    path: PathBuf,
}

impl RoleHintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> Self {
        Self::new(paths::role_hint_path())
    }

    /// # Errors
    /// Returns an error if the file exists but is unreadable.
    pub fn load(&self) -> Result<Option<RoleHint>> {
        storage::load_json(&self.path)
    }

    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, hint: &RoleHint) -> Result<()> {
        storage::save_json(&self.path, &Some(hint))
    }

    /// # Errors
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<bool> {
        storage::remove(&self.path)
    }
}
