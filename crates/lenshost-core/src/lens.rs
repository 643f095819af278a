//! Lens descriptions, queries, and list-diff helpers.

use serde::{Deserialize, Serialize};

/// A lens as reported by the engine's repository.
///
/// Identity is the `id` field: two lenses with the same id are the same
/// list item. Full value equality (all fields) decides whether a bound
/// presentation row needs a re-bind, so preview or name changes are picked
/// up without treating the lens as a new item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lens {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon_uri: Option<String>,
    #[serde(default)]
    pub preview_uris: Vec<String>,
}

impl Lens {
    /// Whether `other` is the same list item (identity by id).
    pub fn same_lens(&self, other: &Lens) -> bool {
        self.id == other.id
    }
}

/// Criteria for a repository query.
///
/// Mirrors an "available in groups" query: lenses are organized in groups
/// and the presentation asks for everything available in a set of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LensQuery {
    pub group_ids: Vec<String>,
}

impl LensQuery {
    /// Query a single lens group.
    pub fn available_in(group_id: impl Into<String>) -> Self {
        Self {
            group_ids: vec![group_id.into()],
        }
    }
}

/// Result of a repository query: an ordered set of lenses, or nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum LensQueryResult {
    Some { lenses: Vec<Lens> },
    None,
}

impl LensQueryResult {
    /// The lenses, if any were found.
    pub fn lenses(&self) -> Option<&[Lens]> {
        match self {
            LensQueryResult::Some { lenses } => Some(lenses),
            LensQueryResult::None => None,
        }
    }
}

/// A single change between two lens lists, keyed by lens identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LensListChange {
    /// Present in the new list only.
    Added(Lens),
    /// Present in the old list only.
    Removed(Lens),
    /// Same identity in both lists but field contents differ.
    Rebind(Lens),
}

/// Whether a bound item with the same identity needs a re-bind.
pub fn needs_rebind(old: &Lens, new: &Lens) -> bool {
    old.same_lens(new) && old != new
}

/// Diff two ordered lens lists by identity.
///
/// Order of the returned changes follows the new list for additions and
/// rebinds, then the old list for removals.
pub fn diff_by_id(old: &[Lens], new: &[Lens]) -> Vec<LensListChange> {
    let mut changes = Vec::new();

    for lens in new {
        match old.iter().find(|o| o.same_lens(lens)) {
            Option::None => changes.push(LensListChange::Added(lens.clone())),
            Option::Some(prev) if needs_rebind(prev, lens) => {
                changes.push(LensListChange::Rebind(lens.clone()))
            }
            Option::Some(_) => {}
        }
    }

    for lens in old {
        if !new.iter().any(|n| n.same_lens(lens)) {
            changes.push(LensListChange::Removed(lens.clone()));
        }
    }

    changes
}
