//! Module loading with trust enforcement.
//!
//! The loader takes an installed module from the module directory to a
//! live `PluginHandle`: manifest checks, host version gate, fingerprint
//! verification against the trust policy, WASM validation, sandbox
//! instantiation, and the attach handshake. A module is loaded at most
//! once; later loads return the existing handle.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::engine::{PluginHandle, WasmLensEngine};
use crate::error::ModuleError;
use crate::installer::{
    sha256_fingerprint, validate_wasm_bytes, InstallReceipt, ENGINE_FILE, MANIFEST_FILE,
    RECEIPT_FILE,
};
use crate::manifest::ModuleManifest;
use crate::sandbox::{EngineSandbox, EngineSandboxConfig};
use lenshost_core::ModuleId;

/// Host version advertised to engine modules and compared against
/// `min_host_version` manifest constraints.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Outcome of a load attempt.
pub type LoadResult = Result<PluginHandle, ModuleError>;

// ─── Trust policy ───────────────────────────────────────────────────────

/// Which module fingerprints the host will load.
#[derive(Debug, Clone)]
pub enum TrustPolicy {
    /// Modules ship with the host installation itself; no fingerprint
    /// check is performed.
    Bundled,
    /// Only modules whose SHA-256 fingerprint is in this set load.
    /// Fail-closed: an empty set loads nothing.
    Anchored(HashSet<String>),
}

impl TrustPolicy {
    /// Build a policy from `LENSHOST_TRUST_FINGERPRINTS`, a comma-separated
    /// list of uppercase hex SHA-256 fingerprints. Unset means bundled
    /// delivery.
    pub fn from_env() -> Self {
        match std::env::var("LENSHOST_TRUST_FINGERPRINTS") {
            Ok(raw) if !raw.trim().is_empty() => {
                let anchors = raw
                    .split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                TrustPolicy::Anchored(anchors)
            }
            _ => TrustPolicy::Bundled,
        }
    }

    /// Whether a module with this fingerprint may load.
    pub fn allows(&self, fingerprint: &str) -> bool {
        match self {
            TrustPolicy::Bundled => true,
            TrustPolicy::Anchored(anchors) => anchors.contains(fingerprint),
        }
    }
}

// ─── Loader ─────────────────────────────────────────────────────────────

/// Loads installed modules into sandboxed engine instances.
pub struct PluginLoader {
    module_dir: PathBuf,
    trust: TrustPolicy,
    sandbox_config: EngineSandboxConfig,
    loaded: Mutex<HashMap<ModuleId, PluginHandle>>,
}

impl PluginLoader {
    pub fn new(
        module_dir: impl Into<PathBuf>,
        trust: TrustPolicy,
        sandbox_config: EngineSandboxConfig,
    ) -> Self {
        Self {
            module_dir: module_dir.into(),
            trust,
            sandbox_config,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for an already loaded module, if any.
    pub fn loaded_handle(&self, module: &ModuleId) -> Option<PluginHandle> {
        self.loaded
            .lock()
            .ok()
            .and_then(|map| map.get(module).cloned())
    }

    /// Load an installed module, or return the existing handle if it was
    /// loaded before. Every failure is reported through the result; this
    /// never panics on module content.
    pub fn load(&self, module: &ModuleId) -> LoadResult {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| ModuleError::Sandbox("loader state poisoned".into()))?;

        if let Some(handle) = loaded.get(module) {
            tracing::debug!(module = %module, "module already loaded, reusing handle");
            return Ok(handle.clone());
        }

        let dir = self.module_dir.join(module.as_str());
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(ModuleError::NotInstalled(module.to_string()));
        }

        let manifest_content = std::fs::read_to_string(&manifest_path)?;
        let manifest = ModuleManifest::parse_and_validate(&manifest_content)?;
        if manifest.module.name != module.as_str() {
            return Err(ModuleError::InvalidManifest(format!(
                "installed manifest declares '{}' but directory is '{}'",
                manifest.module.name, module
            )));
        }

        // Host version gate
        if let Some(ref min_version) = manifest.module.min_host_version {
            let required = semver::Version::parse(min_version)?;
            let current = semver::Version::parse(HOST_VERSION)?;
            if current < required {
                return Err(ModuleError::Unsupported(format!(
                    "module '{module}' requires host >= {required}, this host is {current}"
                )));
            }
        }

        // WASM unit and fingerprint
        let wasm_bytes = std::fs::read(dir.join(ENGINE_FILE))
            .map_err(|_| ModuleError::NotInstalled(module.to_string()))?;
        let max_size = crate::installer::max_wasm_size_from_env();
        if wasm_bytes.len() as u64 > max_size {
            return Err(ModuleError::WasmValidation(format!(
                "WASM binary too large: {} bytes (max: {max_size} bytes)",
                wasm_bytes.len()
            )));
        }
        validate_wasm_bytes(&wasm_bytes)?;
        let fingerprint = sha256_fingerprint(&wasm_bytes);

        // The unit on disk must still match what the installer recorded.
        let receipt_content = std::fs::read_to_string(dir.join(RECEIPT_FILE))
            .map_err(|_| ModuleError::NotInstalled(module.to_string()))?;
        let receipt: InstallReceipt = toml::from_str(&receipt_content)?;
        if receipt.fingerprint != fingerprint {
            return Err(ModuleError::Untrusted(format!(
                "module '{module}' was modified after install: fingerprint mismatch"
            )));
        }

        if !self.trust.allows(&fingerprint) {
            tracing::warn!(
                module = %module,
                fingerprint = %fingerprint,
                "module fingerprint not in trusted set, refusing to load"
            );
            return Err(ModuleError::Untrusted(format!(
                "fingerprint {fingerprint} is not a trusted anchor for '{module}'"
            )));
        }

        // Sandbox and attach handshake
        let sandbox = EngineSandbox::from_bytes(
            wasm_bytes,
            self.sandbox_config.clone(),
            module.as_str(),
        )?;
        let engine = WasmLensEngine::attach(sandbox, HOST_VERSION)?;

        tracing::info!(
            module = %module,
            version = %manifest.module.version,
            fingerprint = %fingerprint,
            "module loaded"
        );

        let handle = PluginHandle::new(
            module.clone(),
            manifest.module.version.clone(),
            fingerprint,
            Arc::new(engine),
        );
        loaded.insert(module.clone(), handle.clone());
        Ok(handle)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
