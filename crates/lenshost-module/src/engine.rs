//! The lens engine capability boundary.
//!
//! `LensEngine` is the only surface the host core sees of a loaded module.
//! Host code never calls into the module directly; it holds a handle to
//! this trait object and everything else (ABI, serialization, sandbox)
//! stays behind it. The WASM-backed implementation lives here too, but a
//! scripted engine can stand in for it in tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModuleError;
use crate::sandbox::EngineSandbox;
use lenshost_core::{Lens, LensQuery, LensQueryResult, ModuleId};

/// Entry points every engine module must export.
pub const REQUIRED_EXPORTS: &[&str] = &[
    "engine_attach",
    "session_open",
    "session_close",
    "query_lenses",
    "apply_lens",
];

// ─── Wire types ─────────────────────────────────────────────────────────

/// Handshake request sent to `engine_attach` right after instantiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachRequest {
    pub host_version: String,
}

/// Handshake response from `engine_attach`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachResponse {
    pub engine_version: String,
}

/// Parameters for opening an engine session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionParams {
    /// Identifier of the output surface the session renders to, if any.
    #[serde(default)]
    pub output_target: Option<String>,
    /// Opaque key/value pairs forwarded to the engine.
    #[serde(default)]
    pub launch_data: BTreeMap<String, String>,
}

/// Opaque token identifying an open engine session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
}

#[derive(Debug, Serialize)]
struct CloseSessionRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Serialize)]
struct QueryLensesRequest<'a> {
    token: &'a str,
    query: &'a LensQuery,
}

#[derive(Debug, Serialize)]
struct ApplyLensRequest<'a> {
    token: &'a str,
    lens_id: &'a str,
    launch_data: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ApplyLensResponse {
    applied: bool,
}

// ─── Capability trait ───────────────────────────────────────────────────

/// Everything the host can do with a loaded lens engine.
#[async_trait]
pub trait LensEngine: Send + Sync {
    /// Open an engine session and return its token.
    async fn open_session(&self, params: &SessionParams) -> Result<SessionToken, ModuleError>;

    /// Close a session. Closing an unknown token is an engine error.
    async fn close_session(&self, token: &SessionToken) -> Result<(), ModuleError>;

    /// Query lenses available to the given groups.
    async fn query_lenses(
        &self,
        token: &SessionToken,
        query: &LensQuery,
    ) -> Result<LensQueryResult, ModuleError>;

    /// Apply a lens within a session. Returns whether the engine accepted it.
    async fn apply_lens(
        &self,
        token: &SessionToken,
        lens: &Lens,
        launch_data: &BTreeMap<String, String>,
    ) -> Result<bool, ModuleError>;
}

// ─── WASM-backed implementation ─────────────────────────────────────────

/// `LensEngine` implemented by calls into a sandboxed WASM module.
///
/// Extism plugin calls take `&mut`, so the sandbox sits behind an async
/// mutex; engine calls from one host serialize at this point.
pub struct WasmLensEngine {
    sandbox: tokio::sync::Mutex<EngineSandbox>,
    engine_version: String,
}

impl WasmLensEngine {
    /// Verify the module's exports and perform the attach handshake.
    pub fn attach(mut sandbox: EngineSandbox, host_version: &str) -> Result<Self, ModuleError> {
        for export in REQUIRED_EXPORTS {
            if !sandbox.has_function(export) {
                return Err(ModuleError::EntryPoint((*export).to_string()));
            }
        }

        let response: AttachResponse = sandbox.call_json(
            "engine_attach",
            &AttachRequest {
                host_version: host_version.to_string(),
            },
        )?;

        tracing::info!(
            module = %sandbox.name(),
            engine_version = %response.engine_version,
            "engine attached"
        );

        Ok(Self {
            sandbox: tokio::sync::Mutex::new(sandbox),
            engine_version: response.engine_version,
        })
    }

    /// Version the engine reported during attach.
    pub fn engine_version(&self) -> &str {
        &self.engine_version
    }
}

#[async_trait]
impl LensEngine for WasmLensEngine {
    async fn open_session(&self, params: &SessionParams) -> Result<SessionToken, ModuleError> {
        let mut sandbox = self.sandbox.lock().await;
        sandbox.call_json("session_open", params)
    }

    async fn close_session(&self, token: &SessionToken) -> Result<(), ModuleError> {
        let mut sandbox = self.sandbox.lock().await;
        let _ack: serde_json::Value = sandbox.call_json(
            "session_close",
            &CloseSessionRequest {
                token: &token.token,
            },
        )?;
        Ok(())
    }

    async fn query_lenses(
        &self,
        token: &SessionToken,
        query: &LensQuery,
    ) -> Result<LensQueryResult, ModuleError> {
        let mut sandbox = self.sandbox.lock().await;
        sandbox.call_json(
            "query_lenses",
            &QueryLensesRequest {
                token: &token.token,
                query,
            },
        )
    }

    async fn apply_lens(
        &self,
        token: &SessionToken,
        lens: &Lens,
        launch_data: &BTreeMap<String, String>,
    ) -> Result<bool, ModuleError> {
        let mut sandbox = self.sandbox.lock().await;
        let response: ApplyLensResponse = sandbox.call_json(
            "apply_lens",
            &ApplyLensRequest {
                token: &token.token,
                lens_id: &lens.id,
                launch_data,
            },
        )?;
        Ok(response.applied)
    }
}

// ─── Handle ─────────────────────────────────────────────────────────────

/// Handle to a successfully loaded module.
///
/// Cloning shares the same underlying engine; a module is loaded at most
/// once per host and every consumer goes through clones of one handle.
#[derive(Clone)]
pub struct PluginHandle {
    module: ModuleId,
    version: String,
    fingerprint: String,
    engine: Arc<dyn LensEngine>,
}

impl PluginHandle {
    pub fn new(
        module: ModuleId,
        version: String,
        fingerprint: String,
        engine: Arc<dyn LensEngine>,
    ) -> Self {
        Self {
            module,
            version,
            fingerprint,
            engine,
        }
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    /// Version from the module manifest.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Uppercase hex SHA-256 fingerprint of the loaded WASM unit.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn engine(&self) -> &Arc<dyn LensEngine> {
        &self.engine
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("module", &self.module)
            .field("version", &self.version)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
