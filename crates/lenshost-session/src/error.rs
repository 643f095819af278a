//! Session error types.

use lenshost_module::ModuleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Preview media could not be prepared. Fatal to the session attempt.
    #[error("media preparation failed: {0}")]
    MediaPreparation(String),

    #[error("engine error: {0}")]
    Engine(#[from] ModuleError),

    #[error("session already released")]
    Released,
}
