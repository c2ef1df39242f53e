//! # Lock Manager
//!
//! Strongly-consistent, TTL-expiring named locks with heartbeat and
//! force-release. At most one live lock exists per key; the backing
//! store's conditional-write primitive is the sole source of truth for
//! "already held", and expiry is enforced by the store's time-based
//! mechanism, never by application scans.
//!
//! Implementations:
//!
//! - [`MemoryLockStore`] - in-process, for tests and dry runs
//! - [`DynamoLockStore`] - production store over DynamoDB conditional
//!   writes plus native TTL
//!
//! While a lock is held, a [`Heartbeat`] renews it at TTL/3 intervals; a
//! refresh failure is a hard error that aborts the current reconciliation
//! stage.

mod dynamo;
mod heartbeat;
mod memory;

pub use dynamo::DynamoLockStore;
pub use heartbeat::Heartbeat;
pub use memory::MemoryLockStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// LOCK
// ============================================================================

/// A held (or observed) lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub key: String,
    /// Random token proving ownership; conditional writes key on it
    pub lock_id: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Fresh random lock token
pub(crate) fn new_lock_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ============================================================================
// LOCK ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum LockError {
    /// A live lock exists for the key
    #[error("lock {key} is already held by {holder} until {expires_at}")]
    AlreadyHeld {
        key: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// The holder's token no longer matches; the lock was lost
    #[error("lock {key} is no longer held by this invocation")]
    NotHeld { key: String },

    #[error("lock {key} not found")]
    NotFound { key: String },

    /// Clock skew produced an already-expired acquisition
    #[error("lock {key} expired at acquisition time")]
    Expired { key: String },

    #[error("lock transport error for {key}: {message}")]
    Transport { key: String, message: String },
}

// ============================================================================
// LOCK STORE TRAIT
// ============================================================================

/// Named-lock contract
///
/// Keys are tenant-relative; the tenancy wrapper applies prefixes before
/// any implementation sees them.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomic create-if-not-exists. Fails with [`LockError::AlreadyHeld`]
    /// when a live lock exists; expired locks are taken over.
    async fn acquire(&self, key: &str, ttl: Duration, owner: &str) -> Result<Lock, LockError>;

    /// Conditional extension: succeeds iff the stored token equals the
    /// holder's. Fails with [`LockError::NotHeld`] when the lock was lost.
    async fn refresh(&self, lock: &Lock, ttl: Duration) -> Result<Lock, LockError>;

    /// Conditional delete keyed on the token; idempotent with respect to
    /// an already-released lock
    async fn release(&self, lock: &Lock) -> Result<(), LockError>;

    /// Unconditional delete. Admin-only surface.
    async fn force_release(&self, key: &str) -> Result<(), LockError>;

    /// Lock metadata, if a lock exists for the key
    async fn get(&self, key: &str) -> Result<Option<Lock>, LockError>;

    /// All live locks under a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<Lock>, LockError>;
}

// ============================================================================
// KEY FORMATS
// ============================================================================

/// Tenant-relative lock key for a (stack, environment)
pub fn stack_lock_key(stack: &str, environment: &str) -> String {
    format!("stack:{stack}:env:{environment}")
}

/// Admin-level lock key
pub fn admin_lock_key(name: &str) -> String {
    format!("admin:{name}")
}
