//! Install/load state machine.
//!
//! The controller decides, on one task, whether the engine module needs
//! installing before it can load, and tells the presentation layer what to
//! show. Installer and loader work runs on spawned tasks and posts results
//! back as events over an mpsc channel, so every transition happens in one
//! place and a failed attempt produces exactly one failure notice.
//!
//! Phases: `Idle -> Checking -> {Loading | Installing -> Loading | Failed}
//! -> {Ready | Failed}`. `start` while an attempt is running is a no-op;
//! `start` after `Ready` re-emits the ready notice without reloading;
//! `start` after `Failed` begins a fresh attempt.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use lenshost_core::ModuleId;
use lenshost_module::{
    InstallService, InstallState, ModuleError, PluginHandle, PluginLoader,
};

// ─── Seams ──────────────────────────────────────────────────────────────

/// Loading seam behind the controller; `PluginLoader` in production,
/// scripted in tests.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, module: &ModuleId) -> Result<PluginHandle, ModuleError>;
}

#[async_trait]
impl EngineLoader for PluginLoader {
    async fn load(&self, module: &ModuleId) -> Result<PluginHandle, ModuleError> {
        PluginLoader::load(self, module)
    }
}

// ─── Public surface ─────────────────────────────────────────────────────

/// Where the controller is in the install/load flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Checking,
    Installing,
    Loading,
    Ready,
    Failed,
}

/// What the presentation layer should show.
#[derive(Debug, Clone)]
pub enum Notice {
    /// Availability check in progress.
    Checking,
    /// Install running, with percent complete.
    Installing(u8),
    /// The module is loaded; the handle is ready to open sessions.
    Ready(PluginHandle),
    /// The attempt failed. Emitted exactly once per attempt; a new
    /// `start` call begins a fresh attempt.
    Failed(String),
}

enum ControllerEvent {
    Start,
    InstallProgress { attempt: Uuid, percent: u8 },
    InstallFinished { attempt: Uuid, outcome: Result<(), String> },
    LoadFinished { outcome: Result<PluginHandle, String> },
}

/// Handle to a running controller task.
pub struct Controller {
    events: mpsc::UnboundedSender<ControllerEvent>,
    phase: watch::Receiver<Phase>,
}

impl Controller {
    /// Spawn the controller's run loop. Notices arrive on the returned
    /// receiver; dropping the `Controller` stops the loop once in-flight
    /// background work has finished posting.
    pub fn spawn(
        module: ModuleId,
        installer: Arc<dyn InstallService>,
        loader: Arc<dyn EngineLoader>,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);

        let run = RunLoop {
            module,
            installer,
            loader,
            // Weak so the loop's own reference does not keep the event
            // channel open after the controller is dropped.
            events: events_tx.downgrade(),
            notices: notices_tx,
            phase: phase_tx,
            state: Phase::Idle,
            attempt: None,
            handle: None,
        };
        tokio::spawn(run.run(events_rx));

        (
            Self {
                events: events_tx,
                phase: phase_rx,
            },
            notices_rx,
        )
    }

    /// Begin (or re-trigger) the install/load flow.
    pub fn start(&self) {
        let _ = self.events.send(ControllerEvent::Start);
    }

    /// Current phase snapshot.
    pub fn phase(&self) -> Phase {
        self.phase.borrow().clone()
    }

    /// Resolves whenever the phase changes; for callers that want to wait
    /// for a settled state rather than consume notices.
    pub async fn phase_changed(&mut self) -> Phase {
        if self.phase.changed().await.is_err() {
            return Phase::Failed;
        }
        self.phase.borrow().clone()
    }
}

// ─── Run loop ───────────────────────────────────────────────────────────

struct RunLoop {
    module: ModuleId,
    installer: Arc<dyn InstallService>,
    loader: Arc<dyn EngineLoader>,
    events: mpsc::WeakUnboundedSender<ControllerEvent>,
    notices: mpsc::UnboundedSender<Notice>,
    phase: watch::Sender<Phase>,
    state: Phase,
    /// Install attempt currently driving the `Installing` phase.
    attempt: Option<Uuid>,
    /// Loaded once, retained for the controller's lifetime.
    handle: Option<PluginHandle>,
}

impl RunLoop {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControllerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ControllerEvent::Start => self.on_start().await,
                ControllerEvent::InstallProgress { attempt, percent } => {
                    self.on_install_progress(attempt, percent)
                }
                ControllerEvent::InstallFinished { attempt, outcome } => {
                    self.on_install_finished(attempt, outcome).await
                }
                ControllerEvent::LoadFinished { outcome } => self.on_load_finished(outcome),
            }
        }
        tracing::debug!(module = %self.module, "controller loop stopped");
    }

    fn transition(&mut self, next: Phase) {
        tracing::debug!(module = %self.module, from = ?self.state, to = ?next, "phase transition");
        self.state = next.clone();
        let _ = self.phase.send(next);
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    async fn on_start(&mut self) {
        match self.state {
            // Loaded handles are kept for the process lifetime; just tell
            // the presentation layer again.
            Phase::Ready => {
                if let Some(handle) = &self.handle {
                    tracing::debug!(module = %self.module, "module already loaded");
                    self.notify(Notice::Ready(handle.clone()));
                }
            }
            // An attempt is running; the existing one keeps reporting.
            Phase::Checking | Phase::Installing | Phase::Loading => {
                tracing::debug!(module = %self.module, phase = ?self.state, "start ignored, attempt in flight");
            }
            Phase::Idle | Phase::Failed => {
                self.transition(Phase::Checking);
                self.notify(Notice::Checking);
                if self.installer.is_installed(&self.module) {
                    tracing::info!(module = %self.module, "module installed, loading");
                    self.begin_load();
                } else {
                    tracing::info!(module = %self.module, "module not installed, requesting install");
                    self.begin_install().await;
                }
            }
        }
    }

    async fn begin_install(&mut self) {
        self.transition(Phase::Installing);
        self.notify(Notice::Installing(0));

        let ticket = self.installer.request_install(&self.module).await;
        self.attempt = Some(ticket.attempt);

        let Some(events) = self.events.upgrade() else {
            return;
        };
        let attempt = ticket.attempt;
        let mut state = ticket.state;
        tokio::spawn(async move {
            loop {
                let current = state.borrow_and_update().clone();
                match current {
                    InstallState::InProgress(percent) => {
                        let _ = events.send(ControllerEvent::InstallProgress { attempt, percent });
                    }
                    InstallState::Installed => {
                        let _ = events.send(ControllerEvent::InstallFinished {
                            attempt,
                            outcome: Ok(()),
                        });
                        return;
                    }
                    InstallState::Failed(reason) => {
                        let _ = events.send(ControllerEvent::InstallFinished {
                            attempt,
                            outcome: Err(reason),
                        });
                        return;
                    }
                    InstallState::NotRequested | InstallState::Requested => {}
                }
                if state.changed().await.is_err() {
                    // Installer went away without a terminal state.
                    let _ = events.send(ControllerEvent::InstallFinished {
                        attempt,
                        outcome: Err("install service stopped reporting".into()),
                    });
                    return;
                }
            }
        });
    }

    fn begin_load(&mut self) {
        self.transition(Phase::Loading);

        let Some(events) = self.events.upgrade() else {
            return;
        };
        let loader = Arc::clone(&self.loader);
        let module = self.module.clone();
        tokio::spawn(async move {
            let outcome = loader.load(&module).await.map_err(|e| e.to_string());
            let _ = events.send(ControllerEvent::LoadFinished { outcome });
        });
    }

    fn on_install_progress(&mut self, attempt: Uuid, percent: u8) {
        if self.state != Phase::Installing || self.attempt != Some(attempt) {
            tracing::debug!(module = %self.module, %attempt, "stale install progress ignored");
            return;
        }
        self.notify(Notice::Installing(percent));
    }

    async fn on_install_finished(&mut self, attempt: Uuid, outcome: Result<(), String>) {
        if self.state != Phase::Installing || self.attempt != Some(attempt) {
            tracing::debug!(module = %self.module, %attempt, "stale install completion ignored");
            return;
        }
        self.attempt = None;

        match outcome {
            Ok(()) => {
                tracing::info!(module = %self.module, "install finished, loading");
                self.begin_load();
            }
            Err(reason) => {
                tracing::warn!(module = %self.module, "install failed: {reason}");
                self.transition(Phase::Failed);
                self.notify(Notice::Failed(format!("installation failed: {reason}")));
            }
        }
    }

    fn on_load_finished(&mut self, outcome: Result<PluginHandle, String>) {
        if self.state != Phase::Loading {
            tracing::debug!(module = %self.module, "stale load completion ignored");
            return;
        }

        match outcome {
            Ok(handle) => {
                tracing::info!(module = %self.module, version = %handle.version(), "module ready");
                self.handle = Some(handle.clone());
                self.transition(Phase::Ready);
                self.notify(Notice::Ready(handle));
            }
            Err(reason) => {
                tracing::warn!(module = %self.module, "load failed: {reason}");
                self.transition(Phase::Failed);
                self.notify(Notice::Failed(format!("load failed: {reason}")));
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
//
// Unit tests here cover phase snapshots; the full scenario flows live in
// tests/controller_flow.rs with scripted installer and loader doubles.
