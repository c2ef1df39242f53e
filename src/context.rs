//! Execution context
//!
//! Binds an invocation to its principal and tenant namespace. Built once
//! after session resolution and carried (cheaply, via `Arc`) into every
//! state, lock, and provider call. The tenancy wrappers read the prefixes
//! from here at call time; nothing else constructs namespaced keys.

use serde::{Deserialize, Serialize};

use crate::types::TenantId;

/// The principal driving this invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Principal {
    /// Platform administrator; operates on the registry and any tenant
    Admin { id: String },
    /// Tenant operator; confined to the tenant's namespace
    Tenant { id: TenantId },
}

impl Principal {
    /// Identifier recorded as lock owner and `deployed_by`
    pub fn id(&self) -> &str {
        match self {
            Principal::Admin { id } => id,
            Principal::Tenant { id } => id.as_str(),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin { .. })
    }
}

/// Per-invocation execution context
///
/// `enabled = false` means single-tenant mode: the tenancy wrappers become
/// transparent pass-throughs and keys are bucket-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub principal: Principal,
    /// Active tenant, when running in multi-tenant mode
    pub tenant_id: Option<TenantId>,
    /// State key prefix, e.g. `tenants/team-a/v1`
    pub storage_prefix: String,
    /// Lock key prefix, e.g. `tenant:team-a`
    pub lock_prefix: String,
    /// Whether tenancy prefixing applies
    pub enabled: bool,
}

impl ExecutionContext {
    /// Context for a tenant principal; prefixes come from the registry entry
    pub fn for_tenant(
        tenant_id: TenantId,
        storage_prefix: impl Into<String>,
        lock_prefix: impl Into<String>,
    ) -> Self {
        Self {
            principal: Principal::Tenant {
                id: tenant_id.clone(),
            },
            tenant_id: Some(tenant_id),
            storage_prefix: storage_prefix.into(),
            lock_prefix: lock_prefix.into(),
            enabled: true,
        }
    }

    /// Context for an admin principal operating outside any tenant namespace
    pub fn for_admin(principal_id: impl Into<String>) -> Self {
        Self {
            principal: Principal::Admin {
                id: principal_id.into(),
            },
            tenant_id: None,
            storage_prefix: String::new(),
            lock_prefix: String::new(),
            enabled: false,
        }
    }

    /// Single-tenant context: keys are bucket-relative, no prefixing
    pub fn single_tenant(principal_id: impl Into<String>) -> Self {
        Self {
            principal: Principal::Admin {
                id: principal_id.into(),
            },
            tenant_id: None,
            storage_prefix: String::new(),
            lock_prefix: String::new(),
            enabled: false,
        }
    }

    /// Admin context scoped into a tenant's namespace (admin acting on
    /// behalf of a tenant)
    pub fn for_admin_in_tenant(
        principal_id: impl Into<String>,
        tenant_id: TenantId,
        storage_prefix: impl Into<String>,
        lock_prefix: impl Into<String>,
    ) -> Self {
        Self {
            principal: Principal::Admin {
                id: principal_id.into(),
            },
            tenant_id: Some(tenant_id),
            storage_prefix: storage_prefix.into(),
            lock_prefix: lock_prefix.into(),
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_context_enables_prefixing() {
        let ctx = ExecutionContext::for_tenant(
            TenantId::new("team-a").unwrap(),
            "tenants/team-a/v1",
            "tenant:team-a",
        );
        assert!(ctx.enabled);
        assert_eq!(ctx.storage_prefix, "tenants/team-a/v1");
        assert_eq!(ctx.principal.id(), "team-a");
    }

    #[test]
    fn test_single_tenant_context_is_passthrough() {
        let ctx = ExecutionContext::single_tenant("ops");
        assert!(!ctx.enabled);
        assert!(ctx.storage_prefix.is_empty());
    }
}
