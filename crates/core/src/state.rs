//! The per-jacket state index.
//!
//! The state index is derived data: a current-revision map plus
//! time-ordered entry lists per tag. It is the only mutable structure in a
//! jacket and is rebuilt from the history chain after a restore.

use std::collections::BTreeMap;

use crate::{EntryNum, HistoryNum, Revision, StateError};

/// Tag the engine maintains for every entry with a live current revision.
pub const TAG_ALL: &str = "_all";

/// How a single `(tag, entry)` pair moves during a state update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagMove {
    /// (Re-)insert the entry at this time.
    Insert(String),
    /// Drop the entry from the tag.
    Remove,
}

/// The change a history record implies for the tag side of the state index.
///
/// Computed by `History::process`, applied by the backend. At most one move
/// per `(tag, entry)` pair; map ordering keeps application deterministic.
#[derive(Debug, Clone, Default)]
pub struct TagDelta(BTreeMap<String, BTreeMap<EntryNum, TagMove>>);

impl TagDelta {
    pub fn insert(&mut self, tag: impl Into<String>, entry: EntryNum, time: impl Into<String>) {
        self.0
            .entry(tag.into())
            .or_default()
            .insert(entry, TagMove::Insert(time.into()));
    }

    pub fn remove(&mut self, tag: impl Into<String>, entry: EntryNum) {
        self.0
            .entry(tag.into())
            .or_default()
            .insert(entry, TagMove::Remove);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = (&str, &BTreeMap<EntryNum, TagMove>)> {
        self.0.iter().map(|(tag, moves)| (tag.as_str(), moves))
    }
}

pub trait StateIndex {
    /// Current revision of entry `num`, or the current history number for
    /// `num == 0`. Zero means "absent".
    fn current(&self, num: u64) -> Result<u64, StateError>;

    fn set_current(&self, num: u64, value: u64) -> Result<(), StateError>;

    /// Tag directory: every currently non-empty tag, in directory order.
    fn tag_names(&self) -> Result<Vec<String>, StateError>;

    /// Total list size plus a newest-first window of up to `max` pairs after
    /// skipping `offset`, computed without materializing the full list.
    ///
    /// `None` when the tag is not in the directory.
    #[allow(clippy::type_complexity)]
    fn tag_window(
        &self,
        tag: &str,
        offset: usize,
        max: usize,
    ) -> Result<Option<(usize, Vec<(String, EntryNum)>)>, StateError>;

    /// Apply a tag delta atomically per tag.
    fn apply_delta(&self, delta: &TagDelta) -> Result<(), StateError>;

    /// Drop all state, returning to the empty-jacket shape.
    fn reset(&self) -> Result<(), StateError>;

    fn current_history(&self) -> Result<HistoryNum, StateError> {
        self.current(0)
    }

    fn current_revision(&self, entry: EntryNum) -> Result<Revision, StateError> {
        self.current(entry)
    }
}
