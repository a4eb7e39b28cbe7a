//! Replaying add and remove actions into the active file set.
//!
//! The log is an append-only sequence of per version action lists. Replay
//! folds them, in ascending version order, into a map from file path to the
//! add entry currently in force. For any given path the last action wins
//! entirely: a re-add replaces the previous entry including all of its
//! statistics, and a remove deletes it. Removing an absent path is a no-op,
//! which makes replay idempotent over tombstones carried by checkpoints.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::actions::{AddFileEntry, LogEntry};
use crate::Version;

/// The set of data files live at one version, keyed by path.
///
/// Immutable once computed; replaying further commits produces a new value.
/// Paths iterate in lexicographic order, which gives split enumeration a
/// stable resume point.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActiveFiles {
    version: Version,
    files: BTreeMap<String, AddFileEntry>,
}

impl ActiveFiles {
    /// The state of a table before any commit.
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    /// Base state from a checkpoint's rows. Only add actions contribute;
    /// remove rows in a checkpoint are retention tombstones, not state.
    pub(crate) fn from_entries(version: Version, entries: &[LogEntry]) -> Self {
        let files = entries
            .iter()
            .filter_map(|entry| entry.add.clone())
            .map(|add| (add.path.clone(), add))
            .collect();
        Self { version, files }
    }

    /// Fold one commit's actions into this state, moving it to `version`.
    pub(crate) fn apply_in_place(&mut self, version: Version, entries: &[LogEntry]) {
        for entry in entries {
            if let Some(add) = &entry.add {
                self.files.insert(add.path.clone(), add.clone());
            } else if let Some(remove) = &entry.remove {
                self.files.remove(&remove.path);
            }
        }
        self.version = version;
    }

    /// Like [`apply_in_place`](Self::apply_in_place) but returns a new state.
    pub fn apply(&self, version: Version, entries: &[LogEntry]) -> Self {
        let mut next = self.clone();
        next.apply_in_place(version, entries);
        next
    }

    /// The version this state reflects.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&AddFileEntry> {
        self.files.get(path)
    }

    /// All live files in path order.
    pub fn iter(&self) -> impl Iterator<Item = &AddFileEntry> {
        self.files.values()
    }

    /// Live files with paths strictly after `cursor`, in path order. The
    /// resume point for batched enumeration.
    pub fn files_after<'a>(
        &'a self,
        cursor: Option<&'a str>,
    ) -> impl Iterator<Item = &'a AddFileEntry> + 'a {
        let range: (Bound<&str>, Bound<&str>) = match cursor {
            Some(cursor) => (Bound::Excluded(cursor), Bound::Unbounded),
            None => (Bound::Unbounded, Bound::Unbounded),
        };
        self.files.range::<str, _>(range).map(|(_, add)| add)
    }

    /// Relative paths of all live files, in order. Convenient for assertions.
    pub fn paths(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }
}

/// Merge a base state with parsed commit tails in ascending version order.
pub fn reconcile<'a, I>(base: &ActiveFiles, commits: I) -> ActiveFiles
where
    I: IntoIterator<Item = (Version, &'a [LogEntry])>,
{
    let mut state = base.clone();
    for (version, entries) in commits {
        state.apply_in_place(version, entries);
    }
    state
}
