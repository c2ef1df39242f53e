//! # YAML Ingestion Pipeline
//!
//! Two ingestion modes produce a [`ResourceSet`]:
//!
//! - **Multi-document file mode**: one `.yaml` file, documents split on
//!   `---` boundaries, each discriminated by its `kind` header.
//! - **Folder mode** (preferred): a stack folder with `stack.yaml` at the
//!   root and `services/<name>/` subfolders, each holding `service.yaml`
//!   plus component documents. Components inherit `metadata.stack` and
//!   `metadata.service` from their containing folder.
//!
//! Parsing is two-phase per document: a header probe reads
//! `apiVersion`/`kind`/`metadata`/`dependsOn`, then the kind-specific
//! decoder populates the spec and rejects unknown fields.
//!
//! `${...}` interpolation runs over the raw text before parsing; references
//! to component outputs stay textual until reconcile time (see
//! [`interpolate`]).

mod folder;
mod interpolate;
mod refs;

pub use folder::parse_stack_folder;
pub use interpolate::{interpolate, resolve_output_refs, VarScope};
pub use refs::extract_implicit_refs;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::schema::{ComponentSpec, Kind, Metadata, Resource};

// ============================================================================
// PARSE ERROR
// ============================================================================

/// Configuration-time parse failure; never retried
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unknown kind '{kind}' in {}", path.display())]
    UnknownKind { path: PathBuf, kind: String },

    #[error("invalid {kind} spec in {}: {source}", path.display())]
    InvalidSpec {
        path: PathBuf,
        kind: Kind,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("stack folder {} has no stack.yaml", path.display())]
    MissingStackFile { path: PathBuf },

    #[error("service folder {} has no service.yaml", path.display())]
    MissingServiceFile { path: PathBuf },

    #[error("{} contains more than one Stack document", path.display())]
    MultipleStacks { path: PathBuf },

    #[error("no Stack document found in the input")]
    NoStack,

    #[error("unresolved variable ${{{name}}} in {}", path.display())]
    UnresolvedVariable { name: String, path: PathBuf },

    #[error("invalid --var override '{0}': expected KEY=VALUE")]
    InvalidOverride(String),
}

// ============================================================================
// RESOURCE SET
// ============================================================================

/// The fully parsed desired state of one stack
#[derive(Debug, Clone)]
pub struct ResourceSet {
    /// The single Stack document
    pub stack: Resource,
    /// Service documents, folder order
    pub services: Vec<Resource>,
    /// Component documents, folder order
    pub components: Vec<Resource>,
    /// Effective stack-level variables (after `--var` overrides)
    pub variables: BTreeMap<String, String>,
    /// SHA-256 over the sorted source file contents
    pub source_checksum: String,
}

impl ResourceSet {
    /// Stack name from the Stack document's metadata
    pub fn stack_name(&self) -> &str {
        &self.stack.metadata.name
    }

    /// Look up a component by name
    pub fn component(&self, name: &str) -> Option<&Resource> {
        self.components.iter().find(|c| c.name() == name)
    }

    /// All component names, document order
    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    /// Variables of one service document, if it declares any
    pub fn service_variables(&self, service: &str) -> BTreeMap<String, String> {
        self.services
            .iter()
            .find(|s| s.name() == service)
            .and_then(|s| match &s.spec {
                ComponentSpec::Service(spec) => Some(spec.variables.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

// ============================================================================
// DOCUMENT DECODING
// ============================================================================

/// Raw document shape read in phase one
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawDocument {
    #[serde(default)]
    api_version: Option<String>,
    kind: String,
    metadata: Metadata,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    spec: serde_yaml::Value,
}

/// Decode a single YAML document value into a typed [`Resource`]
fn decode_document(value: serde_yaml::Value, path: &Path) -> Result<Resource, ParseError> {
    let raw: RawDocument = serde_yaml::from_value(value).map_err(|source| ParseError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    let kind: Kind = raw.kind.parse().map_err(|_| ParseError::UnknownKind {
        path: path.to_path_buf(),
        kind: raw.kind.clone(),
    })?;

    let spec_value = if raw.spec.is_null() {
        serde_yaml::Value::Mapping(Default::default())
    } else {
        raw.spec
    };
    let spec = ComponentSpec::decode(kind, spec_value).map_err(|source| ParseError::InvalidSpec {
        path: path.to_path_buf(),
        kind,
        source,
    })?;

    Ok(Resource {
        api_version: raw
            .api_version
            .unwrap_or_else(|| default_api_version(kind).to_string()),
        kind,
        metadata: raw.metadata,
        depends_on: raw.depends_on,
        spec,
    })
}

/// Symbolic apiVersion used when a document omits one
fn default_api_version(kind: Kind) -> &'static str {
    match kind {
        Kind::Stack | Kind::Service => "core.panka.io/v1",
        _ => "components.panka.io/v1",
    }
}

/// Parse a multi-document YAML string into resources
///
/// Enforces the one-Stack-per-file rule; empty documents are skipped.
pub fn parse_documents(text: &str, path: &Path) -> Result<Vec<Resource>, ParseError> {
    let mut resources = Vec::new();
    let mut stack_count = 0usize;

    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document).map_err(|source| ParseError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        if value.is_null() {
            continue;
        }
        let resource = decode_document(value, path)?;
        if resource.kind == Kind::Stack {
            stack_count += 1;
            if stack_count > 1 {
                return Err(ParseError::MultipleStacks {
                    path: path.to_path_buf(),
                });
            }
        }
        resources.push(resource);
    }

    Ok(resources)
}

/// Parse a standalone multi-document file into a [`ResourceSet`]
///
/// The file must contain exactly one Stack document; Services and
/// components may appear in any order. Components inherit
/// `metadata.stack` (and `metadata.service` from a preceding Service
/// document when not set explicitly).
pub fn parse_stack_file(
    path: &Path,
    overrides: &BTreeMap<String, String>,
) -> Result<ResourceSet, ParseError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // First pass without interpolation to find the stack variables.
    let preliminary = parse_documents(&raw, path)?;
    let stack = preliminary
        .iter()
        .find(|r| r.kind == Kind::Stack)
        .ok_or(ParseError::NoStack)?;
    let stack_vars = match &stack.spec {
        ComponentSpec::Stack(spec) => spec.variables.clone(),
        _ => BTreeMap::new(),
    };
    let mut variables = stack_vars.clone();
    for (k, v) in overrides {
        variables.insert(k.clone(), v.clone());
    }

    let service_vars = BTreeMap::new();
    let cross_service = BTreeMap::new();
    let scope = VarScope::new(&variables, &service_vars, &cross_service);
    let interpolated = interpolate(&raw, &scope, path)?;
    let documents = parse_documents(&interpolated, path)?;

    let mut set = ResourceSet {
        stack: documents
            .iter()
            .find(|r| r.kind == Kind::Stack)
            .cloned()
            .ok_or(ParseError::NoStack)?,
        services: Vec::new(),
        components: Vec::new(),
        variables,
        source_checksum: checksum(&[raw.as_str()]),
    };

    let stack_name = set.stack.metadata.name.clone();
    let mut current_service: Option<String> = None;
    for mut resource in documents {
        match resource.kind {
            Kind::Stack => {}
            Kind::Service => {
                resource.metadata.stack.get_or_insert(stack_name.clone());
                current_service = Some(resource.metadata.name.clone());
                set.services.push(resource);
            }
            _ => {
                resource.metadata.stack.get_or_insert(stack_name.clone());
                if resource.metadata.service.is_none() {
                    resource.metadata.service = current_service.clone();
                }
                set.components.push(resource);
            }
        }
    }

    Ok(set)
}

/// Parse `--var KEY=VALUE` pairs into an override map
pub fn parse_overrides(pairs: &[String]) -> Result<BTreeMap<String, String>, ParseError> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ParseError::InvalidOverride(pair.clone()))?;
        if key.is_empty() {
            return Err(ParseError::InvalidOverride(pair.clone()));
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

/// SHA-256 hex digest over source contents, sorted by the caller
pub(crate) fn checksum(contents: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for chunk in contents {
        hasher.update(chunk.as_bytes());
    }
    hex::encode(hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
