//! Preview media preparation.
//!
//! Sessions may need a media file (an image the engine previews lenses on)
//! staged into the host's cache directory before the first session opens.
//! The copy is write-once: once the file is in the cache it is read-only
//! and later preparations reuse it. Any failure here is fatal to the
//! session attempt and escalates to the caller.

use std::path::{Path, PathBuf};

use crate::error::SessionError;

/// A media file staged into the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewMedia {
    path: PathBuf,
}

impl PreviewMedia {
    /// Location of the staged file inside the cache directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Copy `source` into `cache_dir`, keyed by its file name.
///
/// If the staged file already exists it is reused without rewriting.
pub async fn prepare_preview_media(
    source: &Path,
    cache_dir: &Path,
) -> Result<PreviewMedia, SessionError> {
    let file_name = source
        .file_name()
        .ok_or_else(|| {
            SessionError::MediaPreparation(format!(
                "media source has no file name: {}",
                source.display()
            ))
        })?
        .to_owned();

    tokio::fs::create_dir_all(cache_dir).await.map_err(|e| {
        SessionError::MediaPreparation(format!(
            "failed to create cache dir {}: {e}",
            cache_dir.display()
        ))
    })?;

    let dest = cache_dir.join(file_name);
    if dest.exists() {
        tracing::debug!(media = %dest.display(), "preview media already staged");
        return Ok(PreviewMedia { path: dest });
    }

    tokio::fs::copy(source, &dest).await.map_err(|e| {
        SessionError::MediaPreparation(format!(
            "failed to copy {} into cache: {e}",
            source.display()
        ))
    })?;

    tracing::info!(media = %dest.display(), "preview media staged");
    Ok(PreviewMedia { path: dest })
}

// ─── Tests ──────────────────────────────────────────────────────────────
