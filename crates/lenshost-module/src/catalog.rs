//! Module catalog sources.
//!
//! A catalog is where module packages are distributed from: either a local
//! directory (bundled-style delivery) or an HTTPS base URL (out-of-band
//! delivery). Each module lives under `<catalog>/<module-id>/` with a
//! `module.toml` manifest next to its WASM unit.

use std::path::PathBuf;

use crate::error::ModuleError;
use lenshost_core::ModuleId;

/// Where module packages are fetched from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// Local directory containing one subdirectory per module.
    Directory(PathBuf),
    /// HTTPS base URL; module files are fetched relative to it.
    Https(url::Url),
}

impl CatalogSource {
    /// Parse a catalog location string.
    ///
    /// Strings with an `https://` scheme become validated HTTPS sources;
    /// anything else is treated as a local directory path.
    pub fn parse(location: &str) -> Result<Self, ModuleError> {
        if location.starts_with("https://") || location.starts_with("http://") {
            let parsed = validate_catalog_url(location)?;
            Ok(CatalogSource::Https(parsed))
        } else {
            Ok(CatalogSource::Directory(PathBuf::from(location)))
        }
    }

    /// URL of a file within a module's package, for HTTPS sources.
    pub fn file_url(&self, module: &ModuleId, file: &str) -> Result<url::Url, ModuleError> {
        match self {
            CatalogSource::Https(base) => {
                let mut url = base.clone();
                {
                    let mut segments = url.path_segments_mut().map_err(|_| {
                        ModuleError::Installation(format!("catalog URL cannot be a base: {base}"))
                    })?;
                    segments.pop_if_empty();
                    segments.push(module.as_str());
                    segments.push(file);
                }
                Ok(url)
            }
            CatalogSource::Directory(_) => Err(ModuleError::Installation(
                "file_url is only defined for HTTPS catalogs".into(),
            )),
        }
    }

    /// Path of a file within a module's package, for directory sources.
    pub fn file_path(&self, module: &ModuleId, file: &str) -> Result<PathBuf, ModuleError> {
        match self {
            CatalogSource::Directory(base) => Ok(base.join(module.as_str()).join(file)),
            CatalogSource::Https(_) => Err(ModuleError::Installation(
                "file_path is only defined for directory catalogs".into(),
            )),
        }
    }

    /// Human-readable description for logs and install receipts.
    pub fn describe(&self) -> String {
        match self {
            CatalogSource::Directory(path) => path.display().to_string(),
            CatalogSource::Https(url) => url.to_string(),
        }
    }
}

/// Validate a catalog URL for security.
///
/// Only HTTPS URLs are allowed. File, HTTP, and other protocols are
/// blocked to prevent SSRF and local file access through the installer.
pub fn validate_catalog_url(raw: &str) -> Result<url::Url, ModuleError> {
    let parsed = url::Url::parse(raw)
        .map_err(|_| ModuleError::Installation(format!("invalid catalog URL: '{raw}'")))?;

    if parsed.scheme() != "https" {
        return Err(ModuleError::Installation(format!(
            "only HTTPS catalog URLs are allowed, got scheme '{}' in '{raw}'",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ModuleError::Installation(format!("catalog URL has no host: '{raw}'")))?;

    // SECURITY: Block private/reserved IP ranges and cloud metadata endpoints
    let blocked_hosts = [
        "localhost",
        "127.0.0.1",
        "0.0.0.0",
        "[::1]",
        "169.254.169.254",          // AWS/GCP metadata
        "metadata.google.internal", // GCP metadata
    ];
    if blocked_hosts.contains(&host) {
        return Err(ModuleError::Installation(format!(
            "catalog URL host '{host}' is blocked (private/reserved address)"
        )));
    }

    // Block 10.x.x.x, 172.16-31.x.x, 192.168.x.x
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        let is_private = match ip {
            std::net::IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
            std::net::IpAddr::V6(v6) => v6.is_loopback(),
        };
        if is_private {
            return Err(ModuleError::Installation(format!(
                "catalog URL resolves to private IP: '{host}'"
            )));
        }
    }

    Ok(parsed)
}

// ─── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> ModuleId {
        ModuleId::new("lens-engine").unwrap()
    }

    #[test]
    fn test_parse_directory() {
        let source = CatalogSource::parse("/var/lib/lenshost/catalog").unwrap();
        assert!(matches!(source, CatalogSource::Directory(_)));
    }

    #[test]
    fn test_parse_https() {
        let source = CatalogSource::parse("https://modules.example.com/catalog").unwrap();
        assert!(matches!(source, CatalogSource::Https(_)));
    }

    #[test]
    fn test_parse_rejects_http() {
        let err = CatalogSource::parse("http://modules.example.com").unwrap_err();
        assert!(matches!(err, ModuleError::Installation(_)));
        assert!(err.to_string().contains("HTTPS"));
    }

    #[test]
    fn test_file_url_layout() {
        let source = CatalogSource::parse("https://modules.example.com/catalog").unwrap();
        let url = source.file_url(&module(), "module.toml").unwrap();
        assert_eq!(
            url.as_str(),
            "https://modules.example.com/catalog/lens-engine/module.toml"
        );
    }

    #[test]
    fn test_file_url_trailing_slash() {
        let source = CatalogSource::parse("https://modules.example.com/catalog/").unwrap();
        let url = source.file_url(&module(), "engine.wasm").unwrap();
        assert_eq!(
            url.as_str(),
            "https://modules.example.com/catalog/lens-engine/engine.wasm"
        );
    }

    #[test]
    fn test_file_path_layout() {
        let source = CatalogSource::parse("/srv/catalog").unwrap();
        let path = source.file_path(&module(), "module.toml").unwrap();
        assert_eq!(path, PathBuf::from("/srv/catalog/lens-engine/module.toml"));
    }

    #[test]
    fn test_file_helpers_reject_wrong_variant() {
        let dir = CatalogSource::parse("/srv/catalog").unwrap();
        assert!(dir.file_url(&module(), "module.toml").is_err());

        let https = CatalogSource::parse("https://modules.example.com").unwrap();
        assert!(https.file_path(&module(), "module.toml").is_err());
    }

    // ── Catalog URL validation ──────────────────────────────────────────

    #[test]
    fn test_validate_url_valid_https() {
        assert!(validate_catalog_url("https://modules.example.com/catalog").is_ok());
    }

    #[test]
    fn test_validate_url_reject_file() {
        let err = validate_catalog_url("file:///etc/passwd").unwrap_err();
        assert!(err.to_string().contains("HTTPS"));
    }

    #[test]
    fn test_validate_url_reject_localhost() {
        let err = validate_catalog_url("https://localhost/catalog").unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[test]
    fn test_validate_url_reject_private_ip() {
        let err = validate_catalog_url("https://192.168.1.1/catalog").unwrap_err();
        assert!(err.to_string().contains("private IP"));
    }

    #[test]
    fn test_validate_url_reject_10_private() {
        let err = validate_catalog_url("https://10.0.0.1/catalog").unwrap_err();
        assert!(err.to_string().contains("private IP"));
    }

    #[test]
    fn test_validate_url_reject_metadata() {
        let err = validate_catalog_url("https://169.254.169.254/latest").unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[test]
    fn test_validate_url_reject_gcp_metadata() {
        let err = validate_catalog_url("https://metadata.google.internal/c").unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[test]
    fn test_validate_url_reject_ipv6_loopback() {
        let err = validate_catalog_url("https://[::1]/catalog").unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[test]
    fn test_validate_url_reject_garbage() {
        let err = validate_catalog_url("not a url at all").unwrap_err();
        assert!(err.to_string().contains("invalid catalog URL"));
    }
}
