//! Capability module acquisition and loading for the lenshost host core.
//!
//! This crate covers the module half of the host: checking whether the
//! lens engine module is installed, installing it from a catalog with
//! progress reporting, and loading it into a sandboxed WASM instance
//! behind the [`LensEngine`] capability trait.
//!
//! Isolation rules:
//! - Module WASM runs inside an Extism (wasmtime) sandbox with memory
//!   and fuel limits
//! - WASM imports are restricted to an allowlist of namespaces
//! - Fingerprints are verified against the host's trust policy before
//!   any module code runs
//! - Host code only ever talks to a module through [`PluginHandle`]

pub mod catalog;
pub mod engine;
pub mod error;
pub mod installer;
pub mod loader;
pub mod manifest;
pub mod sandbox;

pub use catalog::CatalogSource;
pub use engine::{
    AttachRequest, AttachResponse, LensEngine, PluginHandle, SessionParams, SessionToken,
    REQUIRED_EXPORTS,
};
pub use error::ModuleError;
pub use installer::{
    sha256_fingerprint, CatalogInstaller, InstallReceipt, InstallService, InstallState,
    InstallTicket,
};
pub use loader::{LoadResult, PluginLoader, TrustPolicy, HOST_VERSION};
pub use manifest::{EngineConfig, ModuleManifest, ModuleMeta};
pub use sandbox::{EngineSandbox, EngineSandboxConfig};
