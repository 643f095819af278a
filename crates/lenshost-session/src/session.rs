//! Engine sessions and their orchestration.
//!
//! A `Session` is a scoped resource: it holds the engine-side token from
//! `session_open` and must be released exactly once. Release is idempotent
//! and every later call on a released session fails with
//! `SessionError::Released`. The orchestrator owns at most one live
//! session; asking it to start while one is live hands back the existing
//! session instead of opening a second.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SessionError;
use crate::media::prepare_preview_media;
use lenshost_core::{Lens, LensQuery, LensQueryResult, ModuleId};
use lenshost_module::{LensEngine, PluginHandle, SessionParams, SessionToken};

/// Where a session's output is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachTarget {
    /// Identifier of the output surface.
    pub surface: String,
}

// ─── Session ────────────────────────────────────────────────────────────

/// A live engine session.
pub struct Session {
    module: ModuleId,
    token: SessionToken,
    engine: Arc<dyn LensEngine>,
    target: AttachTarget,
    released: AtomicBool,
}

impl Session {
    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.released.load(Ordering::Acquire) {
            return Err(SessionError::Released);
        }
        Ok(())
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    pub fn target(&self) -> &AttachTarget {
        &self.target
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Single-shot lens query. No caching; every call goes to the engine.
    pub async fn query_lenses(&self, query: &LensQuery) -> Result<LensQueryResult, SessionError> {
        self.ensure_live()?;
        let result = self.engine.query_lenses(&self.token, query).await?;
        Ok(result)
    }

    /// Apply a lens. Single-shot, last applied wins; the engine reports
    /// whether it accepted the lens.
    pub async fn apply(&self, lens: &Lens) -> Result<bool, SessionError> {
        self.apply_with(lens, &BTreeMap::new()).await
    }

    /// Apply a lens with launch data forwarded to the engine.
    pub async fn apply_with(
        &self,
        lens: &Lens,
        launch_data: &BTreeMap<String, String>,
    ) -> Result<bool, SessionError> {
        self.ensure_live()?;
        let applied = self.engine.apply_lens(&self.token, lens, launch_data).await?;
        if !applied {
            tracing::warn!(module = %self.module, lens = %lens.id, "engine rejected lens");
        }
        Ok(applied)
    }

    /// Release the session. The first call closes the engine session;
    /// every later call is a no-op.
    pub async fn release(&self) -> Result<(), SessionError> {
        if self.released.swap(true, Ordering::AcqRel) {
            tracing::debug!(module = %self.module, "session already released");
            return Ok(());
        }
        self.engine.close_session(&self.token).await?;
        tracing::info!(module = %self.module, surface = %self.target.surface, "session released");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.released.load(Ordering::Acquire) {
            tracing::warn!(
                module = %self.module,
                "session dropped without release, engine-side session leaks"
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("module", &self.module)
            .field("target", &self.target)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

// ─── Orchestrator ───────────────────────────────────────────────────────

/// Owns the lifecycle of at most one live session.
pub struct SessionOrchestrator {
    cache_dir: PathBuf,
    current: tokio::sync::Mutex<Option<Arc<Session>>>,
}

impl SessionOrchestrator {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// Start a session on the given engine, or return the live one.
    ///
    /// `media_source` is staged into the cache directory before the
    /// session opens; a staging failure fails the whole attempt.
    pub async fn start(
        &self,
        handle: &PluginHandle,
        target: AttachTarget,
        media_source: Option<&Path>,
    ) -> Result<Arc<Session>, SessionError> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref() {
            if !session.is_released() {
                tracing::debug!(module = %session.module, "session already live, reusing");
                return Ok(Arc::clone(session));
            }
        }

        let mut launch_data = BTreeMap::new();
        if let Some(source) = media_source {
            let media = prepare_preview_media(source, &self.cache_dir).await?;
            launch_data.insert(
                "preview_media".to_string(),
                media.path().display().to_string(),
            );
        }

        let params = SessionParams {
            output_target: Some(target.surface.clone()),
            launch_data,
        };
        let token = handle.engine().open_session(&params).await?;

        tracing::info!(
            module = %handle.module(),
            surface = %target.surface,
            "session opened"
        );

        let session = Arc::new(Session {
            module: handle.module().clone(),
            token,
            engine: Arc::clone(handle.engine()),
            target,
            released: AtomicBool::new(false),
        });
        *current = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Release the current session, if any. Idempotent.
    pub async fn release(&self) -> Result<(), SessionError> {
        let session = self.current.lock().await.take();
        match session {
            Some(session) => session.release().await,
            None => Ok(()),
        }
    }

    /// The live session, if one exists.
    pub async fn current(&self) -> Option<Arc<Session>> {
        self.current.lock().await.clone()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lenshost_module::ModuleError;
    use std::sync::atomic::AtomicUsize;

    /// Engine double that records open/close calls.
    struct CountingEngine {
        opens: AtomicUsize,
        closes: AtomicUsize,
        lenses: Vec<Lens>,
    }

    impl CountingEngine {
        fn new(lenses: Vec<Lens>) -> Self {
            Self {
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                lenses,
            }
        }
    }

    #[async_trait]
    impl LensEngine for CountingEngine {
        async fn open_session(&self, _params: &SessionParams) -> Result<SessionToken, ModuleError> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(SessionToken {
                token: format!("s-{n}"),
            })
        }

        async fn close_session(&self, _token: &SessionToken) -> Result<(), ModuleError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn query_lenses(
            &self,
            _token: &SessionToken,
            _query: &LensQuery,
        ) -> Result<LensQueryResult, ModuleError> {
            if self.lenses.is_empty() {
                Ok(LensQueryResult::None)
            } else {
                Ok(LensQueryResult::Some {
                    lenses: self.lenses.clone(),
                })
            }
        }

        async fn apply_lens(
            &self,
            _token: &SessionToken,
            _lens: &Lens,
            _launch_data: &BTreeMap<String, String>,
        ) -> Result<bool, ModuleError> {
            Ok(true)
        }
    }

    fn lens(id: &str) -> Lens {
        Lens {
            id: id.to_string(),
            name: format!("Lens {id}"),
            icon_uri: None,
            preview_uris: Vec::new(),
        }
    }

    fn handle(engine: Arc<CountingEngine>) -> PluginHandle {
        PluginHandle::new(
            ModuleId::new("lens-engine").unwrap(),
            "1.0.0".into(),
            "AB".repeat(32),
            engine,
        )
    }

    fn target() -> AttachTarget {
        AttachTarget {
            surface: "surface-1".into(),
        }
    }

    #[tokio::test]
    async fn test_start_opens_session_and_queries() {
        let engine = Arc::new(CountingEngine::new(vec![lens("a"), lens("b")]));
        let cache = tempfile::tempdir().unwrap();
        let orchestrator = SessionOrchestrator::new(cache.path());

        let session = orchestrator
            .start(&handle(Arc::clone(&engine)), target(), None)
            .await
            .unwrap();
        assert_eq!(engine.opens.load(Ordering::SeqCst), 1);

        let result = session.query_lenses(&LensQuery::default()).await.unwrap();
        assert_eq!(result.lenses().unwrap().len(), 2);

        assert!(session.apply(&lens("a")).await.unwrap());
        orchestrator.release().await.unwrap();
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_reuses_live_session() {
        let engine = Arc::new(CountingEngine::new(Vec::new()));
        let cache = tempfile::tempdir().unwrap();
        let orchestrator = SessionOrchestrator::new(cache.path());
        let h = handle(Arc::clone(&engine));

        let first = orchestrator.start(&h, target(), None).await.unwrap();
        let second = orchestrator.start(&h, target(), None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.opens.load(Ordering::SeqCst), 1);

        orchestrator.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_after_release_opens_fresh_session() {
        let engine = Arc::new(CountingEngine::new(Vec::new()));
        let cache = tempfile::tempdir().unwrap();
        let orchestrator = SessionOrchestrator::new(cache.path());
        let h = handle(Arc::clone(&engine));

        let first = orchestrator.start(&h, target(), None).await.unwrap();
        orchestrator.release().await.unwrap();

        let second = orchestrator.start(&h, target(), None).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(engine.opens.load(Ordering::SeqCst), 2);
        orchestrator.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let engine = Arc::new(CountingEngine::new(Vec::new()));
        let cache = tempfile::tempdir().unwrap();
        let orchestrator = SessionOrchestrator::new(cache.path());

        let session = orchestrator
            .start(&handle(Arc::clone(&engine)), target(), None)
            .await
            .unwrap();

        session.release().await.unwrap();
        session.release().await.unwrap();
        orchestrator.release().await.unwrap();
        // The engine session closed exactly once
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_released_session_rejects_calls() {
        let engine = Arc::new(CountingEngine::new(Vec::new()));
        let cache = tempfile::tempdir().unwrap();
        let orchestrator = SessionOrchestrator::new(cache.path());

        let session = orchestrator
            .start(&handle(Arc::clone(&engine)), target(), None)
            .await
            .unwrap();
        session.release().await.unwrap();

        let err = session.query_lenses(&LensQuery::default()).await.unwrap_err();
        assert!(matches!(err, SessionError::Released));
        let err = session.apply(&lens("a")).await.unwrap_err();
        assert!(matches!(err, SessionError::Released));
    }

    #[tokio::test]
    async fn test_media_failure_fails_attempt_without_session() {
        let engine = Arc::new(CountingEngine::new(Vec::new()));
        let cache = tempfile::tempdir().unwrap();
        let orchestrator = SessionOrchestrator::new(cache.path());

        let err = orchestrator
            .start(
                &handle(Arc::clone(&engine)),
                target(),
                Some(Path::new("/nonexistent/preview.jpg")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::MediaPreparation(_)));
        // No engine session was opened
        assert_eq!(engine.opens.load(Ordering::SeqCst), 0);
        assert!(orchestrator.current().await.is_none());
    }

    #[tokio::test]
    async fn test_media_is_passed_as_launch_data() {
        struct ParamsCapture {
            inner: CountingEngine,
            seen: std::sync::Mutex<Option<SessionParams>>,
        }

        #[async_trait]
        impl LensEngine for ParamsCapture {
            async fn open_session(
                &self,
                params: &SessionParams,
            ) -> Result<SessionToken, ModuleError> {
                *self.seen.lock().unwrap() = Some(params.clone());
                self.inner.open_session(params).await
            }
            async fn close_session(&self, token: &SessionToken) -> Result<(), ModuleError> {
                self.inner.close_session(token).await
            }
            async fn query_lenses(
                &self,
                token: &SessionToken,
                query: &LensQuery,
            ) -> Result<LensQueryResult, ModuleError> {
                self.inner.query_lenses(token, query).await
            }
            async fn apply_lens(
                &self,
                token: &SessionToken,
                lens: &Lens,
                launch_data: &BTreeMap<String, String>,
            ) -> Result<bool, ModuleError> {
                self.inner.apply_lens(token, lens, launch_data).await
            }
        }

        let engine = Arc::new(ParamsCapture {
            inner: CountingEngine::new(Vec::new()),
            seen: std::sync::Mutex::new(None),
        });
        let src_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("preview.jpg");
        std::fs::write(&source, b"jpeg").unwrap();

        let cache = tempfile::tempdir().unwrap();
        let orchestrator = SessionOrchestrator::new(cache.path());
        let h = PluginHandle::new(
            ModuleId::new("lens-engine").unwrap(),
            "1.0.0".into(),
            "AB".repeat(32),
            Arc::clone(&engine) as Arc<dyn LensEngine>,
        );

        let session = orchestrator
            .start(&h, target(), Some(&source))
            .await
            .unwrap();

        let params = engine.seen.lock().unwrap().clone().unwrap();
        assert_eq!(params.output_target.as_deref(), Some("surface-1"));
        assert!(params
            .launch_data
            .get("preview_media")
            .unwrap()
            .ends_with("preview.jpg"));

        session.release().await.unwrap();
    }
}
