//! NewType wrappers for the identifier space
//!
//! Every name that ends up in a storage key, lock key, or cloud resource
//! name is validated at construction, so the rest of the crate can carry
//! them without re-checking.
//!
//! Rules:
//! - Tenant ids: lowercase alphanumeric + hyphen, 3-63 chars
//! - Stack / service / component / environment names:
//!   `^[a-z][a-z0-9-]{1,61}[a-z0-9]$`

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Naming rule shared by stacks, services, components, and environments
static RESOURCE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]{1,61}[a-z0-9]$").expect("valid regex"));

/// Tenant id rule: lowercase alphanumeric + hyphen, 3-63 chars
static TENANT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$").expect("valid regex"));

// ============================================================================
// NAME ERROR
// ============================================================================

/// Validation failure for any identifier newtype
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },
    #[error("{kind} '{value}' is invalid: must match lowercase alphanumeric/hyphen, 3-63 chars, starting with a letter or digit")]
    Invalid { kind: &'static str, value: String },
}

fn validate(kind: &'static str, value: &str, re: &Regex) -> Result<(), NameError> {
    if value.is_empty() {
        return Err(NameError::Empty { kind });
    }
    if !re.is_match(value) {
        return Err(NameError::Invalid {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

macro_rules! name_newtype {
    ($(#[$doc:meta])* $name:ident, $kind:literal, $re:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create with validation
            pub fn new(value: impl AsRef<str>) -> Result<Self, NameError> {
                let value = value.as_ref();
                validate($kind, value, &$re)?;
                Ok(Self(value.to_string()))
            }

            /// Get as string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = NameError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(&s)
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> String {
                v.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

name_newtype!(
    /// Isolated namespace identifier; owns a storage prefix and a lock prefix
    TenantId,
    "tenant id",
    TENANT_ID_RE
);

name_newtype!(
    /// Stack name; the unit of locking and state
    StackName,
    "stack name",
    RESOURCE_NAME_RE
);

name_newtype!(
    /// Service name; scope for component-name uniqueness
    ServiceName,
    "service name",
    RESOURCE_NAME_RE
);

name_newtype!(
    /// Component name; graph node id within a (stack, service) scope
    ComponentName,
    "component name",
    RESOURCE_NAME_RE
);

name_newtype!(
    /// Deployment environment name (dev, staging, prod, ...)
    EnvName,
    "environment name",
    RESOURCE_NAME_RE
);

// ============================================================================
// TESTS
// ============================================================================
