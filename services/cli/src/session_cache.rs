//! services/cli/src/session_cache.rs
//!
//! On-disk persistence for the active session between invocations. This is
//! the CLI's stand-in for the stored auth session a browser client keeps;
//! only the auth adapter reads or writes it.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use studyshelf_core::domain::Session;
use studyshelf_core::ports::{PortError, PortResult};
use tracing::warn;
use uuid::Uuid;

/// The serialized form written to disk.
#[derive(Serialize, Deserialize)]
struct StoredSession {
    user_id: Uuid,
    email: String,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl StoredSession {
    fn to_domain(self) -> Session {
        Session {
            user_id: self.user_id,
            email: self.email,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
        }
    }

    fn from_domain(session: &Session) -> Self {
        Self {
            user_id: session.user_id,
            email: session.email.clone(),
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at,
        }
    }
}

pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The cached session, if one exists. An unreadable or corrupt cache is
    /// treated as signed out rather than an error.
    pub fn load(&self) -> PortResult<Option<Session>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "could not read session cache");
                return Ok(None);
            }
        };
        match serde_json::from_str::<StoredSession>(&raw) {
            Ok(stored) => Ok(Some(stored.to_domain())),
            Err(e) => {
                warn!(error = %e, "corrupt session cache, treating as signed out");
                Ok(None)
            }
        }
    }

    pub fn store(&self, session: &Session) -> PortResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }
        let raw = serde_json::to_string_pretty(&StoredSession::from_domain(session))
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        fs::write(&self.path, raw).map_err(|e| PortError::Unexpected(e.to_string()))
    }

    pub fn clear(&self) -> PortResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        }
    }
}
