//! WASM engine sandbox using Extism (wasmtime).
//!
//! The loaded module runs in its own isolated WASM instance with
//! configurable memory and fuel limits. Nothing from the module is ever
//! resolved into the host's own symbol space; every interaction goes
//! through explicit calls into the sandbox, and every fault inside it is
//! converted to a typed error at this boundary.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::ModuleError;

// ─── Configuration ──────────────────────────────────────────────────────

/// Configuration for the engine sandbox.
#[derive(Debug, Clone)]
pub struct EngineSandboxConfig {
    /// Maximum memory in bytes (default: 64 MB).
    pub memory_limit: usize,
    /// Maximum fuel (instructions) per call (default: 5_000_000).
    pub fuel_limit: u64,
    /// Whether to enable WASI (default: false for isolation).
    /// When false, the engine cannot see env vars, filesystem, or stdio.
    pub wasi_enabled: bool,
}

impl Default for EngineSandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            fuel_limit: 5_000_000,
            wasi_enabled: false,
        }
    }
}

impl EngineSandboxConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self {
            memory_limit: std::env::var("LENSHOST_ENGINE_MEMORY_LIMIT_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(64)
                * 1024
                * 1024,
            fuel_limit: std::env::var("LENSHOST_ENGINE_FUEL_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000_000),
            wasi_enabled: std::env::var("LENSHOST_ENGINE_WASI_ENABLED")
                .unwrap_or_default()
                .eq_ignore_ascii_case("true"),
        }
    }
}

// ─── Sandbox ────────────────────────────────────────────────────────────

/// A loaded WASM engine instance.
///
/// Wraps an Extism plugin with memory limits and fuel-based execution
/// limits. Each call gets a fresh fuel budget.
pub struct EngineSandbox {
    plugin: extism::Plugin,
    config: EngineSandboxConfig,
    module_name: String,
}

impl std::fmt::Debug for EngineSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSandbox")
            .field("module_name", &self.module_name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EngineSandbox {
    /// Instantiate a WASM engine from raw bytes into a sandboxed environment.
    ///
    /// Configures the memory ceiling (in 64 KB pages) and fuel-based
    /// execution limits. The caller is expected to have validated the bytes
    /// (magic, size, imports) already; instantiation failures still surface
    /// as `Sandbox` errors rather than faults.
    pub fn from_bytes(
        wasm_bytes: Vec<u8>,
        config: EngineSandboxConfig,
        name: &str,
    ) -> Result<Self, ModuleError> {
        let manifest = extism::Manifest::new([extism::Wasm::data(wasm_bytes)])
            .with_memory_max((config.memory_limit / 65536) as u32);

        let builder = extism::PluginBuilder::new(manifest)
            .with_wasi(config.wasi_enabled)
            .with_fuel_limit(config.fuel_limit);

        if config.wasi_enabled {
            tracing::warn!(
                module = %name,
                "WASI enabled for engine module; it can access environment variables"
            );
        }

        let plugin = builder
            .build()
            .map_err(|e| ModuleError::Sandbox(e.to_string()))?;

        Ok(Self {
            plugin,
            config,
            module_name: name.to_string(),
        })
    }

    /// Call an engine function by name with raw byte input/output.
    ///
    /// Errors are classified into fuel exhaustion, memory exceeded, or
    /// general sandbox errors; none of them propagate as faults.
    pub fn call(&mut self, function_name: &str, input: &[u8]) -> Result<Vec<u8>, ModuleError> {
        let output = self
            .plugin
            .call::<&[u8], Vec<u8>>(function_name, input)
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("fuel") {
                    ModuleError::FuelExhausted(self.module_name.clone())
                } else if msg.contains("memory") {
                    ModuleError::MemoryExceeded(self.module_name.clone())
                } else {
                    ModuleError::Sandbox(msg)
                }
            })?;

        Ok(output)
    }

    /// Call an engine function with JSON-serialized input and output.
    ///
    /// This is the main surface used by the capability trait: input is
    /// serialized to JSON bytes, passed into the sandbox, and the output
    /// is deserialized back.
    pub fn call_json<I: Serialize, O: DeserializeOwned>(
        &mut self,
        function_name: &str,
        input: &I,
    ) -> Result<O, ModuleError> {
        let json_bytes = serde_json::to_vec(input)?;
        let output_bytes = self.call(function_name, &json_bytes)?;
        let result = serde_json::from_slice(&output_bytes)?;
        Ok(result)
    }

    /// Check if the engine exports a function with the given name.
    pub fn has_function(&self, name: &str) -> bool {
        self.plugin.function_exists(name)
    }

    /// Returns the module name.
    pub fn name(&self) -> &str {
        &self.module_name
    }

    /// Returns a reference to the sandbox configuration.
    pub fn config(&self) -> &EngineSandboxConfig {
        &self.config
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_config_default() {
        let config = EngineSandboxConfig::default();
        assert_eq!(config.memory_limit, 64 * 1024 * 1024);
        assert_eq!(config.fuel_limit, 5_000_000);
        assert!(!config.wasi_enabled);
    }

    #[test]
    fn test_sandbox_config_from_env() {
        std::env::set_var("LENSHOST_ENGINE_MEMORY_LIMIT_MB", "128");
        std::env::set_var("LENSHOST_ENGINE_FUEL_LIMIT", "9000000");
        std::env::set_var("LENSHOST_ENGINE_WASI_ENABLED", "true");

        let config = EngineSandboxConfig::from_env();
        assert_eq!(config.memory_limit, 128 * 1024 * 1024);
        assert_eq!(config.fuel_limit, 9_000_000);
        assert!(config.wasi_enabled);

        // Clean up
        std::env::remove_var("LENSHOST_ENGINE_MEMORY_LIMIT_MB");
        std::env::remove_var("LENSHOST_ENGINE_FUEL_LIMIT");
        std::env::remove_var("LENSHOST_ENGINE_WASI_ENABLED");

        let config_default = EngineSandboxConfig::from_env();
        assert!(!config_default.wasi_enabled);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let config = EngineSandboxConfig::default();
        let result = EngineSandbox::from_bytes(
            b"this is not valid wasm at all".to_vec(),
            config,
            "bad-module",
        );
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(
            matches!(err, ModuleError::Sandbox(_)),
            "expected Sandbox error, got: {err:?}"
        );
    }

    #[test]
    fn test_from_bytes_rejects_truncated_wasm() {
        let config = EngineSandboxConfig::default();
        let result = EngineSandbox::from_bytes(b"\0asm but truncated".to_vec(), config, "bad");
        assert!(matches!(result.unwrap_err(), ModuleError::Sandbox(_)));
    }
}
