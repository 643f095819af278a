//! Module manifest parsing and validation.
//!
//! Parses `module.toml` files that declare a capability module's metadata
//! and the WASM unit carrying its engine implementation.

use serde::{Deserialize, Serialize};

use crate::error::ModuleError;
use lenshost_core::ModuleId;

/// Module manifest parsed from `module.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub module: ModuleMeta,
    pub engine: EngineConfig,
}

/// Module metadata section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMeta {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub min_host_version: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
}

/// Engine section: where the WASM unit lives inside the module package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub wasm: String,
}

// ─── Validation helpers ─────────────────────────────────────────────

/// Validate a version string as semver.
fn validate_semver(value: &str, field_name: &str) -> Result<(), ModuleError> {
    semver::Version::parse(value).map_err(|_| {
        ModuleError::InvalidManifest(format!("{field_name} is not valid semver: '{value}'"))
    })?;
    Ok(())
}

/// Validate that a path is safe (no `..` components, not absolute).
fn validate_path_safety(path: &str, field_name: &str) -> Result<(), ModuleError> {
    let p = std::path::Path::new(path);
    if p.is_absolute() {
        return Err(ModuleError::InvalidManifest(format!(
            "{field_name} must be a relative path, got absolute: '{path}'"
        )));
    }
    for component in p.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err(ModuleError::InvalidManifest(format!(
                "{field_name} must not contain '..': '{path}'"
            )));
        }
    }
    Ok(())
}

impl ModuleManifest {
    /// Parse a module manifest from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, ModuleError> {
        let manifest: ModuleManifest = toml::from_str(toml_str)?;
        Ok(manifest)
    }

    /// Validate all fields of a parsed manifest.
    pub fn validate(&self) -> Result<(), ModuleError> {
        // ── Module metadata ─────────────────────────────────────────
        ModuleId::new(&self.module.name)
            .map_err(|e| ModuleError::InvalidManifest(format!("module.name: {e}")))?;

        validate_semver(&self.module.version, "module.version")?;

        let desc_len = self.module.description.len();
        if desc_len == 0 || desc_len > 500 {
            return Err(ModuleError::InvalidManifest(format!(
                "module.description must be 1-500 characters, got {desc_len}"
            )));
        }

        if let Some(ref author) = self.module.author {
            let len = author.len();
            if len == 0 || len > 255 {
                return Err(ModuleError::InvalidManifest(format!(
                    "module.author must be 1-255 characters, got {len}"
                )));
            }
        }

        if let Some(ref license) = self.module.license {
            let len = license.len();
            if len == 0 || len > 50 {
                return Err(ModuleError::InvalidManifest(format!(
                    "module.license must be 1-50 characters, got {len}"
                )));
            }
        }

        if let Some(ref min_ver) = self.module.min_host_version {
            validate_semver(min_ver, "module.min_host_version")?;
        }

        // ── Engine config ───────────────────────────────────────────
        validate_path_safety(&self.engine.wasm, "engine.wasm")?;

        if !self.engine.wasm.ends_with(".wasm") {
            return Err(ModuleError::InvalidManifest(format!(
                "engine.wasm must end with '.wasm', got '{}'",
                self.engine.wasm
            )));
        }

        Ok(())
    }

    /// Parse and validate in one step. Used by the installer and loader.
    pub fn parse_and_validate(toml_str: &str) -> Result<Self, ModuleError> {
        let manifest = Self::parse(toml_str)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// The module identifier declared by this manifest.
    pub fn module_id(&self) -> Result<ModuleId, ModuleError> {
        ModuleId::new(&self.module.name)
            .map_err(|e| ModuleError::InvalidManifest(format!("module.name: {e}")))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
