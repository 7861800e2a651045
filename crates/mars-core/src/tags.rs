//! Derived tag index
//!
//! Maps molecule UID to its tags joined with `", "`. The index is a cache:
//! molecules are the source of truth and the whole map can be rebuilt from
//! them at any time. Untagged molecules have no entry.

use crate::record::Molecule;
use dashmap::DashMap;
use indexmap::IndexSet;

/// Separator between tags in a joined tag list
pub const TAG_SEPARATOR: &str = ", ";

/// Join tags in insertion order, `None` when there are none
pub fn join_tags(tags: &IndexSet<String>) -> Option<String> {
    if tags.is_empty() {
        return None;
    }
    Some(tags.iter().map(String::as_str).collect::<Vec<_>>().join(TAG_SEPARATOR))
}

/// Concurrent UID to tag-list map
#[derive(Debug, Default)]
pub struct TagIndex {
    entries: DashMap<String, String>,
}

impl TagIndex {
    /// Create an empty tag index
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the entry for `molecule` in line with its tags
    pub fn refresh(&self, molecule: &Molecule) {
        match join_tags(&molecule.tags) {
            Some(joined) => {
                self.entries.insert(molecule.uid.clone(), joined);
            }
            None => {
                self.entries.remove(&molecule.uid);
            }
        }
    }

    /// Drop the entry for `uid`
    pub fn remove(&self, uid: &str) -> Option<String> {
        self.entries.remove(uid).map(|(_, tags)| tags)
    }

    /// Joined tag list for `uid`
    pub fn get(&self, uid: &str) -> Option<String> {
        self.entries.get(uid).map(|entry| entry.value().clone())
    }

    /// Keep only entries whose UID satisfies `keep`; returns how many were pruned
    pub fn retain<F: Fn(&str) -> bool>(&self, keep: F) -> usize {
        let before = self.entries.len();
        self.entries.retain(|uid, _| keep(uid));
        before.saturating_sub(self.entries.len())
    }

    /// Number of tagged molecules
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no molecule is tagged
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }
}
