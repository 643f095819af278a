//! Module installer: availability checks and asynchronous installation.
//!
//! The installer acquires a module package from a catalog (local directory
//! or HTTPS), validates it, and persists it into the local module directory
//! so that a later availability check returns true. Progress and the single
//! terminal outcome of each attempt are broadcast over a watch channel;
//! a second install request while an attempt is in flight returns the
//! existing ticket instead of starting another attempt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::catalog::CatalogSource;
use crate::error::ModuleError;
use crate::manifest::ModuleManifest;
use lenshost_core::ModuleId;

// ─── Constants ──────────────────────────────────────────────────────────

/// WASM magic bytes: `\0asm`
pub const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Default max WASM binary size: 50 MB.
const DEFAULT_MAX_WASM_SIZE_MB: u64 = 50;

/// Allowed WASM import namespaces. Imports outside these are rejected.
const ALLOWED_IMPORT_NAMESPACES: &[&str] = &[
    "env",                    // Extism host functions
    "extism:host/env",        // Extism host functions (component model)
    "wasi_snapshot_preview1", // WASI preview 1
    "wasi_unstable",          // Legacy WASI
];

/// Manifest file name inside a module package.
pub const MANIFEST_FILE: &str = "module.toml";

/// WASM unit file name inside an installed module directory.
pub const ENGINE_FILE: &str = "engine.wasm";

/// Install receipt file name inside an installed module directory.
pub const RECEIPT_FILE: &str = "receipt.toml";

// ─── Install state ──────────────────────────────────────────────────────

/// State of a module install attempt.
///
/// Owned exclusively by the installer; everyone else reads it through a
/// watch receiver. `Installed` and `Failed` are terminal and delivered at
/// most once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    NotRequested,
    Requested,
    InProgress(u8),
    Installed,
    Failed(String),
}

impl InstallState {
    /// Whether this state ends the attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallState::Installed | InstallState::Failed(_))
    }
}

/// Handle to an install attempt: its id and a state subscription.
#[derive(Debug, Clone)]
pub struct InstallTicket {
    pub attempt: Uuid,
    pub state: watch::Receiver<InstallState>,
}

/// Platform install service consumed by the state machine.
///
/// `is_installed` is a pure, cheap query; `request_install` starts (or
/// joins) an asynchronous install attempt.
#[async_trait]
pub trait InstallService: Send + Sync {
    fn is_installed(&self, module: &ModuleId) -> bool;
    async fn request_install(&self, module: &ModuleId) -> InstallTicket;
}

// ─── Install receipt ────────────────────────────────────────────────────

/// Record written next to an installed module.
///
/// The receipt is what makes an install visible to availability checks and
/// carries the fingerprint the loader verifies against its trust anchors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub module: String,
    pub version: String,
    pub fingerprint: String,
    pub source: String,
    pub installed_at: chrono::DateTime<chrono::FixedOffset>,
}

impl InstallReceipt {
    /// Read and parse a receipt file.
    pub async fn read_from(path: &Path) -> Result<Self, ModuleError> {
        let content = tokio::fs::read_to_string(path).await?;
        let receipt = toml::from_str(&content)?;
        Ok(receipt)
    }
}

/// Uppercase hex SHA-256 fingerprint of a distributed unit.
pub fn sha256_fingerprint(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hash.iter().map(|b| format!("{b:02X}")).collect()
}

/// WASM size cap in bytes, from `LENSHOST_WASM_MAX_SIZE_MB`.
pub fn max_wasm_size_from_env() -> u64 {
    std::env::var("LENSHOST_WASM_MAX_SIZE_MB")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_MAX_WASM_SIZE_MB)
        * 1024
        * 1024
}

// ─── WASM validation ────────────────────────────────────────────────────

/// Validate WASM bytes: magic header and import namespaces.
pub fn validate_wasm_bytes(wasm_bytes: &[u8]) -> Result<(), ModuleError> {
    if wasm_bytes.len() < 4 || &wasm_bytes[..4] != WASM_MAGIC {
        return Err(ModuleError::WasmValidation(
            "invalid WASM binary: magic bytes mismatch".into(),
        ));
    }
    validate_wasm_imports(wasm_bytes)
}

/// Validate WASM imports against the allowed namespace list.
fn validate_wasm_imports(wasm_bytes: &[u8]) -> Result<(), ModuleError> {
    use wasmparser::{Parser, Payload};

    let parser = Parser::new(0);

    for payload in parser.parse_all(wasm_bytes) {
        let payload =
            payload.map_err(|e| ModuleError::WasmValidation(format!("failed to parse WASM: {e}")))?;

        if let Payload::ImportSection(reader) = payload {
            for import in reader {
                let import = import.map_err(|e| {
                    ModuleError::WasmValidation(format!("failed to read import: {e}"))
                })?;

                let module = import.module;
                if !ALLOWED_IMPORT_NAMESPACES.contains(&module) {
                    return Err(ModuleError::WasmValidation(format!(
                        "unauthorized import namespace: '{}' (function: '{}'); \
                         allowed namespaces: {:?}",
                        module, import.name, ALLOWED_IMPORT_NAMESPACES
                    )));
                }
            }
        }
    }

    Ok(())
}

// ─── Catalog installer ──────────────────────────────────────────────────

struct InstallerInner {
    catalog: CatalogSource,
    module_dir: PathBuf,
    max_wasm_size: u64,
    http: reqwest::Client,
    /// In-flight attempts; an entry is removed once its terminal state is
    /// delivered so that a later explicit request can retry.
    in_flight: Mutex<HashMap<ModuleId, InstallTicket>>,
}

/// Installer backed by a module catalog.
#[derive(Clone)]
pub struct CatalogInstaller {
    inner: Arc<InstallerInner>,
}

impl CatalogInstaller {
    /// Create an installer for the given catalog and local module directory.
    ///
    /// `LENSHOST_WASM_MAX_SIZE_MB` caps the accepted WASM unit size.
    pub fn new(catalog: CatalogSource, module_dir: impl Into<PathBuf>) -> Self {
        let max_wasm_size = max_wasm_size_from_env();

        Self {
            inner: Arc::new(InstallerInner {
                catalog,
                module_dir: module_dir.into(),
                max_wasm_size,
                http: reqwest::Client::new(),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Directory a module is installed into.
    pub fn install_dir(&self, module: &ModuleId) -> PathBuf {
        self.inner.module_dir.join(module.as_str())
    }

    /// Remove an installed module's files.
    pub async fn uninstall(&self, module: &ModuleId) -> Result<(), ModuleError> {
        let dir = self.install_dir(module);
        if !dir.join(MANIFEST_FILE).exists() {
            return Err(ModuleError::NotInstalled(module.to_string()));
        }
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| ModuleError::Installation(format!("failed to remove module files: {e}")))?;
        tracing::info!(module = %module, "module uninstalled");
        Ok(())
    }

    /// List modules present in the local module directory.
    pub fn installed_modules(&self) -> Vec<ModuleId> {
        let Ok(entries) = std::fs::read_dir(&self.inner.module_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(MANIFEST_FILE).exists())
            .filter_map(|e| ModuleId::new(e.file_name().to_string_lossy()).ok())
            .collect()
    }
}

#[async_trait]
impl InstallService for CatalogInstaller {
    fn is_installed(&self, module: &ModuleId) -> bool {
        let dir = self.install_dir(module);
        dir.join(MANIFEST_FILE).exists()
            && dir.join(ENGINE_FILE).exists()
            && dir.join(RECEIPT_FILE).exists()
    }

    async fn request_install(&self, module: &ModuleId) -> InstallTicket {
        let mut in_flight = self.inner.in_flight.lock().await;

        // A non-terminal attempt already covers this module; join it
        // instead of starting a second one.
        if let Some(ticket) = in_flight.get(module) {
            if !ticket.state.borrow().is_terminal() {
                tracing::debug!(
                    module = %module,
                    attempt = %ticket.attempt,
                    "install already in flight, returning existing ticket"
                );
                return ticket.clone();
            }
        }

        let attempt = Uuid::new_v4();
        let (tx, rx) = watch::channel(InstallState::Requested);
        let ticket = InstallTicket { attempt, state: rx };
        in_flight.insert(module.clone(), ticket.clone());
        drop(in_flight);

        tracing::info!(module = %module, attempt = %attempt, "starting module installation");

        let inner = Arc::clone(&self.inner);
        let module = module.clone();
        tokio::spawn(async move {
            let outcome = run_install(&inner, &module, &tx).await;
            // Exactly one terminal state per attempt.
            let terminal = match outcome {
                Ok(()) => {
                    tracing::info!(module = %module, attempt = %attempt, "module installed");
                    InstallState::Installed
                }
                Err(e) => {
                    tracing::error!(module = %module, attempt = %attempt, "module install failed: {e}");
                    InstallState::Failed(e.to_string())
                }
            };
            let _ = tx.send(terminal);

            // Clear the in-flight entry so a new explicit request can retry.
            let mut in_flight = inner.in_flight.lock().await;
            if in_flight
                .get(&module)
                .map(|t| t.attempt == attempt)
                .unwrap_or(false)
            {
                in_flight.remove(&module);
            }
        });

        ticket
    }
}

/// Publish an intermediate progress value; a closed channel means nobody
/// is listening anymore, which is not an error.
fn report_progress(tx: &watch::Sender<InstallState>, percent: u8) {
    let _ = tx.send(InstallState::InProgress(percent.min(100)));
}

/// The full installation flow:
/// 1. Fetch and validate `module.toml` from the catalog
/// 2. Fetch the WASM unit into a staging directory, with progress
/// 3. Validate the WASM unit (size, magic bytes, imports)
/// 4. Write the install receipt (version, fingerprint, source, timestamp)
/// 5. Copy everything into the module directory
async fn run_install(
    inner: &InstallerInner,
    module: &ModuleId,
    tx: &watch::Sender<InstallState>,
) -> Result<(), ModuleError> {
    report_progress(tx, 0);

    // 1. Manifest
    let manifest_content = fetch_text(inner, module, MANIFEST_FILE).await?;
    let manifest = ModuleManifest::parse_and_validate(&manifest_content)?;
    if manifest.module.name != module.as_str() {
        return Err(ModuleError::Installation(format!(
            "module name mismatch: requested '{}', catalog declares '{}'",
            module, manifest.module.name
        )));
    }
    report_progress(tx, 10);

    // 2. WASM unit into staging
    let staging = tempfile::tempdir()
        .map_err(|e| ModuleError::Installation(format!("failed to create staging dir: {e}")))?;
    let staged_wasm = staging.path().join(ENGINE_FILE);
    fetch_wasm(inner, module, &manifest.engine.wasm, &staged_wasm, tx, 10, 85).await?;

    // 3. Validation
    let metadata = tokio::fs::metadata(&staged_wasm).await?;
    if metadata.len() > inner.max_wasm_size {
        return Err(ModuleError::WasmValidation(format!(
            "WASM binary too large: {} bytes (max: {} bytes)",
            metadata.len(),
            inner.max_wasm_size
        )));
    }
    let wasm_bytes = tokio::fs::read(&staged_wasm).await?;
    validate_wasm_bytes(&wasm_bytes)?;
    report_progress(tx, 90);

    // 4. Receipt
    let receipt = InstallReceipt {
        module: module.to_string(),
        version: manifest.module.version.clone(),
        fingerprint: sha256_fingerprint(&wasm_bytes),
        source: inner.catalog.describe(),
        installed_at: chrono::Utc::now().fixed_offset(),
    };
    let receipt_toml = toml::to_string(&receipt)
        .map_err(|e| ModuleError::Installation(format!("failed to encode receipt: {e}")))?;

    // 5. Persist into the module directory
    let install_dir = inner.module_dir.join(module.as_str());
    if install_dir.exists() {
        tokio::fs::remove_dir_all(&install_dir)
            .await
            .map_err(|e| ModuleError::Installation(format!("failed to clean install dir: {e}")))?;
    }
    tokio::fs::create_dir_all(&install_dir)
        .await
        .map_err(|e| ModuleError::Installation(format!("failed to create install dir: {e}")))?;

    tokio::fs::copy(&staged_wasm, install_dir.join(ENGINE_FILE))
        .await
        .map_err(|e| ModuleError::Installation(format!("failed to copy WASM unit: {e}")))?;
    tokio::fs::write(install_dir.join(MANIFEST_FILE), &manifest_content)
        .await
        .map_err(|e| ModuleError::Installation(format!("failed to write manifest: {e}")))?;
    // The receipt goes in last: its presence marks the install complete.
    tokio::fs::write(install_dir.join(RECEIPT_FILE), receipt_toml)
        .await
        .map_err(|e| ModuleError::Installation(format!("failed to write receipt: {e}")))?;

    report_progress(tx, 100);
    Ok(())
}

/// Fetch a small text file (the manifest) from the catalog.
async fn fetch_text(
    inner: &InstallerInner,
    module: &ModuleId,
    file: &str,
) -> Result<String, ModuleError> {
    match &inner.catalog {
        CatalogSource::Directory(_) => {
            let path = inner.catalog.file_path(module, file)?;
            tokio::fs::read_to_string(&path).await.map_err(|e| {
                ModuleError::Installation(format!("failed to read {}: {e}", path.display()))
            })
        }
        CatalogSource::Https(_) => {
            let url = inner.catalog.file_url(module, file)?;
            let response = inner
                .http
                .get(url.clone())
                .send()
                .await
                .map_err(|e| ModuleError::Http(format!("GET {url} failed: {e}")))?;
            if !response.status().is_success() {
                return Err(ModuleError::Http(format!(
                    "GET {url} returned {}",
                    response.status()
                )));
            }
            response
                .text()
                .await
                .map_err(|e| ModuleError::Http(format!("reading {url} failed: {e}")))
        }
    }
}

/// Fetch the WASM unit into `dest`, reporting progress between
/// `from_percent` and `to_percent`.
async fn fetch_wasm(
    inner: &InstallerInner,
    module: &ModuleId,
    file: &str,
    dest: &Path,
    tx: &watch::Sender<InstallState>,
    from_percent: u8,
    to_percent: u8,
) -> Result<(), ModuleError> {
    let span = (to_percent - from_percent) as u64;
    let scale = |copied: u64, total: u64| -> u8 {
        if total == 0 {
            to_percent
        } else {
            from_percent + (copied.min(total) * span / total) as u8
        }
    };

    match &inner.catalog {
        CatalogSource::Directory(_) => {
            let src_path = inner.catalog.file_path(module, file)?;
            let total = tokio::fs::metadata(&src_path)
                .await
                .map_err(|e| {
                    ModuleError::Installation(format!(
                        "WASM unit not found at {}: {e}",
                        src_path.display()
                    ))
                })?
                .len();

            let mut src = tokio::fs::File::open(&src_path).await?;
            let mut out = tokio::fs::File::create(dest).await?;
            let mut copied = 0u64;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = src.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                tokio::io::AsyncWriteExt::write_all(&mut out, &buf[..n]).await?;
                copied += n as u64;
                report_progress(tx, scale(copied, total));
            }
        }
        CatalogSource::Https(_) => {
            let url = inner.catalog.file_url(module, file)?;
            let mut response = inner
                .http
                .get(url.clone())
                .send()
                .await
                .map_err(|e| ModuleError::Http(format!("GET {url} failed: {e}")))?;
            if !response.status().is_success() {
                return Err(ModuleError::Http(format!(
                    "GET {url} returned {}",
                    response.status()
                )));
            }

            let total = response.content_length().unwrap_or(0);
            let mut out = tokio::fs::File::create(dest).await?;
            let mut copied = 0u64;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| ModuleError::Http(format!("reading {url} failed: {e}")))?
            {
                tokio::io::AsyncWriteExt::write_all(&mut out, &chunk).await?;
                copied += chunk.len() as u64;
                if copied > inner.max_wasm_size {
                    return Err(ModuleError::WasmValidation(format!(
                        "WASM download exceeded size cap of {} bytes",
                        inner.max_wasm_size
                    )));
                }
                if total > 0 {
                    report_progress(tx, scale(copied, total));
                }
            }
        }
    }

    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────────
