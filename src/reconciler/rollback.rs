//! # Rollback Transaction
//!
//! Append-only log of reversible actions recorded during an apply, safe
//! for concurrent append from stage workers. Opened at apply start,
//! cleared on success, consumed LIFO on failure:
//!
//! - `created` reverses to a delete
//! - `updated` reverses to re-applying the before-state
//! - `deleted` reverses to a best-effort recreate from the before-state
//!
//! Reversal is never nested; errors during reversal are collected while
//! the remaining actions continue.

use std::sync::Mutex;

use thiserror::Error;

use crate::schema::Kind;
use crate::state::ResourceState;

// ============================================================================
// ACTIONS
// ============================================================================

/// What the apply did, and therefore how to undo it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Created,
    Updated,
    Deleted,
}

/// One reversible step
#[derive(Debug, Clone)]
pub struct RollbackAction {
    pub kind: ActionKind,
    pub resource_id: String,
    pub resource_kind: Kind,
    /// State before the action; absent for creations
    pub before: Option<ResourceState>,
    /// State after the action; absent for deletions
    pub after: Option<ResourceState>,
}

/// Failure while reversing one action; reversal continues past it
#[derive(Debug, Error)]
#[error("rollback of {resource_id} failed: {message}")]
pub struct RollbackError {
    pub resource_id: String,
    pub message: String,
}

// ============================================================================
// LOG
// ============================================================================

/// Concurrent append-only rollback log
#[derive(Debug, Default)]
pub struct RollbackLog {
    actions: Mutex<Vec<RollbackAction>>,
}

impl RollbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action; called from stage workers as mutations land
    pub fn record(&self, action: RollbackAction) {
        self.actions.lock().expect("rollback log lock").push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.lock().expect("rollback log lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the log in reverse (LIFO) order
    pub fn drain_lifo(&self) -> Vec<RollbackAction> {
        let mut actions = std::mem::take(&mut *self.actions.lock().expect("rollback log lock"));
        actions.reverse();
        actions
    }

    /// Drop all recorded actions (successful apply)
    pub fn clear(&self) {
        self.actions.lock().expect("rollback log lock").clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================
