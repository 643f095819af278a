//! Shared value types for the lenshost module system.
//!
//! These are the types that cross crate boundaries: module identifiers,
//! lens descriptions and query results. They carry no behavior beyond
//! validation and equality rules so that both the acquisition side
//! (`lenshost-module`) and the orchestration side (`lenshost-session`)
//! can depend on them without depending on each other.

pub mod id;
pub mod lens;

pub use id::{InvalidModuleId, ModuleId};
pub use lens::{diff_by_id, needs_rebind, Lens, LensListChange, LensQuery, LensQueryResult};
