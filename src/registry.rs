//! # Tenant Registry
//!
//! Catalog of tenants persisted as a single YAML document at
//! `{bucket-root}/tenants.yaml`. Every mutation is a read-modify-write of
//! the whole document under the global `admin:registry` lock, so partial
//! writes are impossible and concurrent writers lose to the lock holder.
//!
//! Credentials: a generated secret is shown once at creation; only its
//! bcrypt digest is stored. Verification compares digests; rotation
//! rewrites the digest, which invalidates every outstanding tenant
//! session (sessions are client-side and re-verified against this
//! document). "Delete" never discards state: archival copies the
//! tenant's storage under a time-stamped archive prefix and marks the
//! entry `deleted`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::lock::{admin_lock_key, LockError, LockStore};
use crate::session::AuthError;
use crate::state::{StateBackend, StateError};
use crate::types::TenantId;

/// Registry object key at the bucket root
pub const REGISTRY_KEY: &str = "tenants.yaml";

/// Bcrypt cost for tenant credential digests
const BCRYPT_COST: u32 = 12;

/// TTL for the registry read-modify-write critical section
const REGISTRY_LOCK_TTL: Duration = Duration::from_secs(60);

/// Secret body length (excluding the tenant tag prefix)
const SECRET_LEN: usize = 32;

const URL_SAFE_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

// ============================================================================
// REGISTRY ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tenant '{id}' already exists")]
    TenantExists { id: String },

    #[error("unknown tenant '{id}'")]
    TenantNotFound { id: String },

    #[error("registry is being modified by another admin: {0}")]
    Contended(LockError),

    #[error("registry storage error: {0}")]
    State(#[from] StateError),

    #[error("registry document is corrupt: {0}")]
    Corrupt(#[from] serde_yaml::Error),

    #[error("credential hashing failed: {0}")]
    Credential(#[from] bcrypt::BcryptError),
}

impl From<LockError> for RegistryError {
    fn from(err: LockError) -> Self {
        RegistryError::Contended(err)
    }
}

// ============================================================================
// REGISTRY SCHEMA
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantCredentials {
    /// Bcrypt digest of `{tag}_{secret}`; never the plaintext
    pub hash: String,
    pub algorithm: String,
    pub rotations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStorage {
    /// e.g. `tenants/team-a/v1`
    pub prefix: String,
    pub version: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantLocks {
    /// e.g. `tenant:team-a`
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantLimits {
    pub cost_tracking: bool,
    pub monthly_cost_limit: f64,
    pub max_stacks: u32,
    pub max_services: u32,
}

impl Default for TenantLimits {
    fn default() -> Self {
        Self {
            cost_tracking: true,
            monthly_cost_limit: 1000.0,
            max_stacks: 10,
            max_services: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcConfig {
    pub cidr_block: String,
    #[serde(default)]
    pub enable_dns_hostnames: bool,
    #[serde(default)]
    pub enable_dns_support: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetLayout {
    #[serde(default)]
    pub public: Vec<String>,
    #[serde(default)]
    pub private: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatGatewayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub gateway_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternetGatewayConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRule {
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantNetworking {
    #[serde(default)]
    pub vpc: VpcConfig,
    #[serde(default)]
    pub subnets: SubnetLayout,
    #[serde(default)]
    pub nat_gateway: NatGatewayConfig,
    #[serde(default)]
    pub internet_gateway: InternetGatewayConfig,
    #[serde(default)]
    pub default_security_group: Vec<SecurityGroupRule>,
    /// Provisioned ids filled in as networking is created
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_ids: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantEntry {
    pub id: TenantId,
    pub display_name: String,
    pub email: String,
    pub status: TenantStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub credentials: TenantCredentials,
    pub storage: TenantStorage,
    pub locks: TenantLocks,
    #[serde(default)]
    pub limits: TenantLimits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<TenantNetworking>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    #[serde(default)]
    pub lock_table: String,
    #[serde(default = "default_version")]
    pub default_version: String,
}

fn default_version() -> String {
    "v1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDocument {
    pub version: String,
    #[serde(default)]
    pub metadata: RegistryMetadata,
    #[serde(default)]
    pub config: RegistryConfig,
    #[serde(default)]
    pub tenants: Vec<TenantEntry>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            metadata: RegistryMetadata {
                created: Some(Utc::now()),
                updated: Some(Utc::now()),
                ..Default::default()
            },
            config: RegistryConfig {
                lock_table: String::new(),
                default_version: default_version(),
            },
            tenants: Vec::new(),
        }
    }
}

// ============================================================================
// SECRET GENERATION
// ============================================================================

/// `{tag}_{secret}`: 4-char tenant tag plus 32 URL-safe random chars
fn generate_secret(id: &TenantId) -> String {
    let tag: String = id
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(4)
        .collect();
    let tag = if tag.len() < 4 {
        format!("{tag:x<4}")
    } else {
        tag
    };

    let mut rng = rand::thread_rng();
    let body: String = (0..SECRET_LEN)
        .map(|_| URL_SAFE_ALPHABET[rng.gen_range(0..URL_SAFE_ALPHABET.len())] as char)
        .collect();
    format!("{tag}_{body}")
}

// ============================================================================
// TENANT REGISTRY
// ============================================================================

/// Registry client; all writes run inside the admin lock
pub struct TenantRegistry {
    state: Arc<dyn StateBackend>,
    locks: Arc<dyn LockStore>,
}

impl TenantRegistry {
    pub fn new(state: Arc<dyn StateBackend>, locks: Arc<dyn LockStore>) -> Self {
        Self { state, locks }
    }

    /// Read the whole registry; absent means empty
    pub async fn load(&self) -> Result<RegistryDocument, RegistryError> {
        match self.state.load(REGISTRY_KEY).await {
            Ok((body, _)) => Ok(serde_yaml::from_str(&body)?),
            Err(err) if err.is_not_found() => Ok(RegistryDocument::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Keyed lookup
    pub async fn get(&self, id: &TenantId) -> Result<TenantEntry, RegistryError> {
        self.load()
            .await?
            .tenants
            .into_iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| RegistryError::TenantNotFound { id: id.to_string() })
    }

    /// List tenants, optionally filtered by status
    pub async fn list(
        &self,
        status: Option<TenantStatus>,
    ) -> Result<Vec<TenantEntry>, RegistryError> {
        let mut tenants = self.load().await?.tenants;
        if let Some(status) = status {
            tenants.retain(|t| t.status == status);
        }
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tenants)
    }

    /// Create a tenant; returns the entry and the one-time plaintext secret
    pub async fn create(
        &self,
        id: &TenantId,
        display_name: &str,
        email: &str,
        admin: &str,
    ) -> Result<(TenantEntry, String), RegistryError> {
        let secret = generate_secret(id);
        let hash = bcrypt::hash(&secret, BCRYPT_COST)?;
        let now = Utc::now();

        let entry = TenantEntry {
            id: id.clone(),
            display_name: display_name.to_string(),
            email: email.to_string(),
            status: TenantStatus::Active,
            created: now,
            updated: now,
            credentials: TenantCredentials {
                hash,
                algorithm: "bcrypt".to_string(),
                rotations: 0,
                last_rotated: None,
            },
            storage: TenantStorage {
                prefix: format!("tenants/{id}/v1"),
                version: "v1".to_string(),
                path: format!("tenants/{id}"),
            },
            locks: TenantLocks {
                prefix: format!("tenant:{id}"),
            },
            limits: TenantLimits::default(),
            networking: None,
        };

        let created = entry.clone();
        self.mutate(admin, move |doc| {
            if doc.tenants.iter().any(|t| t.id == entry.id) {
                return Err(RegistryError::TenantExists {
                    id: entry.id.to_string(),
                });
            }
            doc.tenants.push(entry.clone());
            Ok(())
        })
        .await?;

        info!(tenant = %id, "tenant created");
        Ok((created, secret))
    }

    /// Rotate credentials; returns the new one-time secret and invalidates
    /// every outstanding session for the tenant
    pub async fn rotate(&self, id: &TenantId, admin: &str) -> Result<String, RegistryError> {
        let secret = generate_secret(id);
        let hash = bcrypt::hash(&secret, BCRYPT_COST)?;
        let target = id.clone();

        self.mutate(admin, move |doc| {
            let entry = find_mut(doc, &target)?;
            entry.credentials.hash = hash.clone();
            entry.credentials.rotations += 1;
            entry.credentials.last_rotated = Some(Utc::now());
            entry.updated = Utc::now();
            Ok(())
        })
        .await?;

        info!(tenant = %id, "tenant credentials rotated");
        Ok(secret)
    }

    pub async fn suspend(&self, id: &TenantId, admin: &str) -> Result<(), RegistryError> {
        self.set_status(id, TenantStatus::Suspended, admin).await
    }

    pub async fn activate(&self, id: &TenantId, admin: &str) -> Result<(), RegistryError> {
        self.set_status(id, TenantStatus::Active, admin).await
    }

    async fn set_status(
        &self,
        id: &TenantId,
        status: TenantStatus,
        admin: &str,
    ) -> Result<(), RegistryError> {
        let target = id.clone();
        self.mutate(admin, move |doc| {
            let entry = find_mut(doc, &target)?;
            entry.status = status;
            entry.updated = Utc::now();
            Ok(())
        })
        .await
    }

    /// Archive a tenant: copy its stored objects under a time-stamped
    /// archive prefix, delete the originals, mark the entry deleted.
    /// Nothing is ever silently destroyed.
    pub async fn archive(&self, id: &TenantId, admin: &str) -> Result<String, RegistryError> {
        let entry = self.get(id).await?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let archive_prefix = format!("archive/{id}/{stamp}");

        let keys = self.state.list(&entry.storage.path).await?;
        for key in keys {
            let (body, _) = self.state.load(&key).await?;
            self.state
                .save(&format!("{archive_prefix}/{key}"), &body)
                .await?;
            self.state.delete(&key).await?;
        }

        let target = id.clone();
        self.mutate(admin, move |doc| {
            let entry = find_mut(doc, &target)?;
            entry.status = TenantStatus::Deleted;
            entry.updated = Utc::now();
            Ok(())
        })
        .await?;

        info!(tenant = %id, archive = %archive_prefix, "tenant archived");
        Ok(archive_prefix)
    }

    /// Verify a presented secret against the stored digest
    ///
    /// The plaintext exists in memory only for the duration of this call.
    pub async fn verify(&self, id: &TenantId, secret: &str) -> Result<TenantEntry, AuthError> {
        let entry = match self.get(id).await {
            Ok(entry) => entry,
            Err(RegistryError::TenantNotFound { id }) => {
                return Err(AuthError::UnknownTenant { id })
            }
            // Indistinguishable from a bad secret to the caller.
            Err(_) => return Err(AuthError::InvalidSecret),
        };

        match entry.status {
            TenantStatus::Active => {}
            _ => {
                return Err(AuthError::TenantSuspended {
                    id: id.to_string(),
                })
            }
        }

        let ok = bcrypt::verify(secret, &entry.credentials.hash).unwrap_or(false);
        if ok {
            Ok(entry)
        } else {
            Err(AuthError::InvalidSecret)
        }
    }

    /// Read-modify-write of the whole document inside the admin lock
    async fn mutate<F>(&self, admin: &str, apply: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut RegistryDocument) -> Result<(), RegistryError>,
    {
        let lock = self
            .locks
            .acquire(&admin_lock_key("registry"), REGISTRY_LOCK_TTL, admin)
            .await?;

        let result = async {
            let mut doc = self.load().await?;
            apply(&mut doc)?;
            doc.metadata.updated = Some(Utc::now());
            let body = serde_yaml::to_string(&doc)?;
            self.state.save(REGISTRY_KEY, &body).await?;
            Ok(())
        }
        .await;

        // Release regardless of outcome; idempotent by contract.
        let _ = self.locks.release(&lock).await;
        result
    }
}

fn find_mut<'a>(
    doc: &'a mut RegistryDocument,
    id: &TenantId,
) -> Result<&'a mut TenantEntry, RegistryError> {
    doc.tenants
        .iter_mut()
        .find(|t| &t.id == id)
        .ok_or_else(|| RegistryError::TenantNotFound { id: id.to_string() })
}

// ============================================================================
// TESTS
// ============================================================================
