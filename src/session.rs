//! # Sessions
//!
//! Client-side records binding an invocation to a principal. A session
//! file carries `{principal-id, expiry, storage-prefix, lock-prefix}` and
//! lives under `$PANKA_HOME` (default `~/.panka/`) at `0600`. It is not a
//! capability token: expiry is checked locally, and every privileged
//! operation re-validates the principal against the live registry.
//!
//! Lifetimes: admin sessions up to 8 hours, tenant sessions up to 7 days.
//! Credential rotation invalidates outstanding tenant sessions because
//! verification always runs against the current digest.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// AUTH ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not logged in; no {kind} session found")]
    NotLoggedIn { kind: &'static str },

    #[error("session expired at {expired_at}; log in again")]
    SessionExpired { expired_at: DateTime<Utc> },

    #[error("invalid tenant credentials")]
    InvalidSecret,

    #[error("tenant '{id}' is suspended")]
    TenantSuspended { id: String },

    #[error("unknown tenant '{id}'")]
    UnknownTenant { id: String },

    #[error("session file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session file is corrupt: {0}")]
    Corrupt(#[from] serde_yaml::Error),
}

// ============================================================================
// SESSION
// ============================================================================

/// Which principal class the session authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Admin,
    Tenant,
}

impl SessionKind {
    fn file_name(&self) -> &'static str {
        match self {
            SessionKind::Admin => "admin-session.yaml",
            SessionKind::Tenant => "session.yaml",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SessionKind::Admin => "admin",
            SessionKind::Tenant => "tenant",
        }
    }

    /// Longest permitted lifetime
    pub fn max_lifetime(&self) -> Duration {
        match self {
            SessionKind::Admin => Duration::hours(8),
            SessionKind::Tenant => Duration::days(7),
        }
    }
}

/// A stored session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub kind: SessionKind,
    pub principal_id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub storage_prefix: String,
    #[serde(default)]
    pub lock_prefix: String,
}

impl Session {
    /// New session clamped to the kind's maximum lifetime
    pub fn new(
        kind: SessionKind,
        principal_id: impl Into<String>,
        storage_prefix: impl Into<String>,
        lock_prefix: impl Into<String>,
        lifetime: Duration,
    ) -> Self {
        let lifetime = lifetime.min(kind.max_lifetime());
        Self {
            kind,
            principal_id: principal_id.into(),
            expires_at: Utc::now() + lifetime,
            storage_prefix: storage_prefix.into(),
            lock_prefix: lock_prefix.into(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

// ============================================================================
// SESSION STORE
// ============================================================================

/// File-backed session storage under the panka home directory
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$PANKA_HOME`, or `~/.panka`
    pub fn default_dir() -> PathBuf {
        if let Ok(home) = std::env::var("PANKA_HOME") {
            return PathBuf::from(home);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home).join(".panka")
    }

    fn path(&self, kind: SessionKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Persist the session at restricted permissions
    pub fn save(&self, session: &Session) -> Result<(), AuthError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(session.kind);
        let body = serde_yaml::to_string(session)?;
        std::fs::write(&path, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Load and expiry-check a session
    pub fn load(&self, kind: SessionKind) -> Result<Session, AuthError> {
        let path = self.path(kind);
        let body = std::fs::read_to_string(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AuthError::NotLoggedIn {
                    kind: kind.label(),
                }
            } else {
                AuthError::Io(err)
            }
        })?;
        let session: Session = serde_yaml::from_str(&body)?;
        if session.is_expired() {
            return Err(AuthError::SessionExpired {
                expired_at: session.expires_at,
            });
        }
        Ok(session)
    }

    /// Remove a session file; absent is fine
    pub fn delete(&self, kind: SessionKind) -> Result<(), AuthError> {
        match std::fs::remove_file(self.path(kind)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err)),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
