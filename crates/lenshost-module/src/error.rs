//! Module system error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("module not installed: {0}")]
    NotInstalled(String),

    #[error("installation error: {0}")]
    Installation(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("untrusted module: {0}")]
    Untrusted(String),

    #[error("WASM validation error: {0}")]
    WasmValidation(String),

    #[error("entry point not found: {0}")]
    EntryPoint(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("module not supported by host: {0}")]
    Unsupported(String),

    #[error("execution timeout: module {0} exceeded fuel limit")]
    FuelExhausted(String),

    #[error("memory limit exceeded: module {0}")]
    MemoryExceeded(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("semver error: {0}")]
    Semver(#[from] semver::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    // ── Display messages ──────────────────────────────────────────────

    #[test]
    fn test_display_not_installed() {
        let err = ModuleError::NotInstalled("lens-engine".into());
        assert_eq!(err.to_string(), "module not installed: lens-engine");
    }

    #[test]
    fn test_display_installation() {
        let err = ModuleError::Installation("download interrupted".into());
        assert_eq!(err.to_string(), "installation error: download interrupted");
    }

    #[test]
    fn test_display_invalid_manifest() {
        let err = ModuleError::InvalidManifest("bad version".into());
        assert_eq!(err.to_string(), "invalid manifest: bad version");
    }

    #[test]
    fn test_display_untrusted() {
        let err = ModuleError::Untrusted("fingerprint not in trusted set".into());
        assert_eq!(
            err.to_string(),
            "untrusted module: fingerprint not in trusted set"
        );
    }

    #[test]
    fn test_display_entry_point() {
        let err = ModuleError::EntryPoint("session_open".into());
        assert_eq!(err.to_string(), "entry point not found: session_open");
    }

    #[test]
    fn test_display_sandbox() {
        let err = ModuleError::Sandbox("wasm trap".into());
        assert_eq!(err.to_string(), "sandbox error: wasm trap");
    }

    #[test]
    fn test_display_unsupported() {
        let err = ModuleError::Unsupported("requires host >= 2.0.0".into());
        assert_eq!(
            err.to_string(),
            "module not supported by host: requires host >= 2.0.0"
        );
    }

    #[test]
    fn test_display_fuel_exhausted() {
        let err = ModuleError::FuelExhausted("lens-engine".into());
        assert_eq!(
            err.to_string(),
            "execution timeout: module lens-engine exceeded fuel limit"
        );
    }

    // ── From conversions ──────────────────────────────────────────────

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err: ModuleError = io_err.into();
        assert!(matches!(err, ModuleError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("bad json{{{").unwrap_err();
        let err: ModuleError = json_err.into();
        assert!(matches!(err, ModuleError::Serialization(_)));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= bad").unwrap_err();
        let err: ModuleError = toml_err.into();
        assert!(matches!(err, ModuleError::TomlParse(_)));
    }

    #[test]
    fn test_from_semver_error() {
        let sv_err = "not.a.version".parse::<semver::Version>().unwrap_err();
        let err: ModuleError = sv_err.into();
        assert!(matches!(err, ModuleError::Semver(_)));
    }

    // ── Error trait source chain ──────────────────────────────────────

    #[test]
    fn test_error_source_io() {
        use std::error::Error;
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broken");
        let err: ModuleError = io_err.into();
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_source_string_variants() {
        use std::error::Error;
        let err = ModuleError::Sandbox("timeout".into());
        assert!(err.source().is_none());
    }
}
