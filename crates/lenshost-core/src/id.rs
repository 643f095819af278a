//! Opaque module identifier.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a module identifier string is rejected.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid module id: {0}")]
pub struct InvalidModuleId(pub String);

/// Opaque name of an optional capability module.
///
/// Supplied by configuration and passed through to the platform install
/// service unchanged. The accepted form is `^[a-z][a-z0-9-]{1,63}$`:
/// 2-64 characters, lowercase ASCII letter first, then lowercase letters,
/// digits, or hyphens. This keeps the id safe to embed in directory names
/// and install receipts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleId(String);

impl ModuleId {
    /// Validate and wrap a module identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidModuleId> {
        let id = id.into();
        let len = id.len();
        if !(2..=64).contains(&len) {
            return Err(InvalidModuleId(format!(
                "must be 2-64 characters, got {len}"
            )));
        }

        let mut chars = id.chars();
        let Some(first) = chars.next() else {
            return Err(InvalidModuleId("must not be empty".into()));
        };
        if !first.is_ascii_lowercase() {
            return Err(InvalidModuleId(format!(
                "must start with a lowercase letter, got '{first}'"
            )));
        }
        for ch in chars {
            if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() && ch != '-' {
                return Err(InvalidModuleId(format!("contains invalid character '{ch}'")));
            }
        }

        Ok(Self(id))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ModuleId {
    type Error = InvalidModuleId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModuleId> for String {
    fn from(id: ModuleId) -> Self {
        id.0
    }
}
