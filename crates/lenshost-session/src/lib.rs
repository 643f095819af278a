//! Session orchestration for the lenshost host core.
//!
//! Sits between the presentation layer and `lenshost-module`: the
//! [`Controller`] drives the install/load flow and reports [`Notice`]s,
//! the [`SessionOrchestrator`] owns the single live [`Session`] opened on
//! a loaded engine, and preview media staging happens before the first
//! session opens.

pub mod controller;
pub mod error;
pub mod media;
pub mod session;

pub use controller::{Controller, EngineLoader, Notice, Phase};
pub use error::SessionError;
pub use media::{prepare_preview_media, PreviewMedia};
pub use session::{AttachTarget, Session, SessionOrchestrator};
