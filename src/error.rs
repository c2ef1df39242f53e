//! # Panka Error Module
//!
//! Unified error handling for the Panka CLI.
//!
//! Each subsystem owns its error type (`ParseError`, `LockError`,
//! `ProviderError`, ...); this module provides the top-level [`PankaError`]
//! that wraps them for the CLI entry point, maps every failure to a process
//! exit code, and attaches an optional remediation hint.
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success or no changes |
//! | 1 | user / configuration error |
//! | 2 | validation error (including cycles) |
//! | 3 | lock contention |
//! | 4 | provider or state failure during apply/destroy |
//! | 5 | rollback invoked and succeeded |
//! | 6 | rollback invoked and failed |

use thiserror::Error;

use crate::lock::LockError;
use crate::provider::ProviderError;
use crate::state::StateError;

// ============================================================================
// PANKA ERROR (Top-level CLI Error)
// ============================================================================

/// Top-level error type for the Panka CLI
///
/// Wraps the specific error types from each subsystem, providing a unified
/// interface (and exit-code mapping) for the CLI entry point.
#[derive(Error, Debug)]
pub enum PankaError {
    /// Parse-time configuration error (malformed YAML, unknown kind, bad
    /// folder layout, unresolved variable)
    #[error("{0}")]
    Parse(#[from] crate::parser::ParseError),

    /// Aggregated validation failures
    #[error("{0}")]
    Validation(#[from] crate::validator::ValidationReport),

    /// Dependency cycle detected in the component graph
    #[error("{0}")]
    Cycle(#[from] crate::graph::GraphError),

    /// The stack/environment lock is held by another invocation
    #[error("lock contention: {key} is held by {holder}")]
    LockContention { key: String, holder: String },

    /// Lock subsystem failure other than contention
    #[error("{0}")]
    Lock(LockError),

    /// State backend failure
    #[error("{0}")]
    State(#[from] StateError),

    /// Provider failure during apply/destroy
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// A provider failed, rollback ran, and every recorded action was
    /// reversed
    #[error("apply failed ({cause}); rollback completed, all created resources were reversed")]
    RolledBack { cause: String },

    /// A provider failed and rollback itself hit errors
    #[error("apply failed ({cause}); rollback incomplete: {}", errors.join("; "))]
    RollbackFailed { cause: String, errors: Vec<String> },

    /// Authentication / session failure
    #[error("{0}")]
    Auth(#[from] crate::session::AuthError),

    /// Tenant registry failure
    #[error("{0}")]
    Registry(#[from] crate::registry::RegistryError),

    /// Invalid tenant / stack / component name
    #[error("{0}")]
    Name(#[from] crate::types::NameError),

    /// YAML (de)serialization error outside the parser pipeline
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error (session file, stack folder, ...)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl PankaError {
    /// Create a generic error with a message
    pub fn other(msg: impl Into<String>) -> Self {
        PankaError::Other(msg.into())
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PankaError::Validation(_) | PankaError::Cycle(_) => 2,
            PankaError::LockContention { .. } => 3,
            PankaError::Lock(_) | PankaError::State(_) | PankaError::Provider(_) => 4,
            PankaError::RolledBack { .. } => 5,
            PankaError::RollbackFailed { .. } => 6,
            _ => 1,
        }
    }

    /// Remediation hint for the CLI, when one exists
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            PankaError::Parse(_) => {
                Some("Check YAML syntax, document kinds, and ${...} variable references")
            }
            PankaError::Validation(_) => {
                Some("Fix the listed errors; run 'panka validate' to re-check without locking")
            }
            PankaError::Cycle(_) => Some(
                "Break the dependency cycle by removing one of the listed dependsOn/valueFrom edges",
            ),
            PankaError::LockContention { .. } => Some(
                "Wait for the other deployment to finish, or have an admin force-release the lock",
            ),
            PankaError::Auth(_) => Some("Run 'panka login' (or 'panka admin login') and retry"),
            PankaError::Io(_) => Some("Check the path exists and has correct permissions"),
            _ => None,
        }
    }
}

impl From<LockError> for PankaError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::AlreadyHeld {
                ref key,
                ref holder,
                ..
            } => PankaError::LockContention {
                key: key.clone(),
                holder: holder.clone(),
            },
            other => PankaError::Lock(other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(PankaError::other("bad flag").exit_code(), 1);
        assert_eq!(
            PankaError::LockContention {
                key: "stack:app:env:dev".into(),
                holder: "alice".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(
            PankaError::RolledBack {
                cause: "boom".into()
            }
            .exit_code(),
            5
        );
        assert_eq!(
            PankaError::RollbackFailed {
                cause: "boom".into(),
                errors: vec!["delete failed".into()]
            }
            .exit_code(),
            6
        );
    }

    #[test]
    fn test_lock_contention_from_lock_error() {
        let err: PankaError = LockError::AlreadyHeld {
            key: "stack:app:env:dev".into(),
            holder: "bob".into(),
            expires_at: chrono::Utc::now(),
        }
        .into();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("bob"));
    }

    #[test]
    fn test_contention_has_hint() {
        let err = PankaError::LockContention {
            key: "k".into(),
            holder: "h".into(),
        };
        assert!(err.hint().is_some());
    }
}
