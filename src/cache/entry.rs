use serde::{Deserialize, Serialize};

use crate::{
    record::DefinitionRecord,
    types::{EntryKey, Kind, RecordId},
};

/// Lifecycle of a locally held edit relative to the last known server value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirtyState {
    /// Working value equals the server value; reloads replace it silently.
    Clean,
    /// Local changes are pending.
    Editing,
    /// A write for this entry is in flight.
    Saving,
    /// The server changed underneath a local edit; the user must choose.
    Conflict,
}

impl DirtyState {
    /// True when the working value may differ from the server value.
    pub fn has_local_changes(self) -> bool {
        !matches!(self, DirtyState::Clean)
    }
}

/// Cached server value plus working copy for one record or draft.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Record id once saved; drafts use `EntryKey::Draft`.
    pub key: EntryKey,
    /// Last known server value; `None` for drafts.
    pub server: Option<DefinitionRecord>,
    /// Current working value.
    pub working: DefinitionRecord,
    /// Dirty state.
    pub state: DirtyState,
    pub(crate) save_in_flight: bool,
}

impl CacheEntry {
    pub(crate) fn clean(key: EntryKey, record: DefinitionRecord) -> Self {
        Self {
            key,
            server: Some(record.clone()),
            working: record,
            state: DirtyState::Clean,
            save_in_flight: false,
        }
    }

    /// True while a write for this entry is outstanding.
    pub fn is_saving(&self) -> bool {
        self.save_in_flight
    }

    /// True for drafts that were never saved.
    pub fn is_draft(&self) -> bool {
        matches!(self.key, EntryKey::Draft(_))
    }
}

/// User choice when leaving [`DirtyState::Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local working value and continue editing.
    KeepMine,
    /// Replace the working value with the new server value.
    TakeTheirs,
}

/// Write to issue for an entry that entered [`DirtyState::Saving`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaveRequest {
    /// First save of a draft.
    Create {
        /// Record to create.
        record: DefinitionRecord,
    },
    /// Update of an existing record.
    Update {
        /// Target id.
        id: RecordId,
        /// Replacement record.
        record: DefinitionRecord,
    },
}

/// Result of a reload fetch for one id.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The server returned this value.
    Found(DefinitionRecord),
    /// The server no longer has the record.
    Gone,
}

/// What a reload merge did to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing changed.
    Unchanged,
    /// A record not held locally was added.
    Inserted,
    /// Server (and, for clean entries, working) value replaced.
    Replaced,
    /// Server value replaced under a local edit; entry is now in conflict.
    Conflicted,
    /// Entry removed because the server no longer has it.
    Removed {
        /// True when unsaved local changes were discarded.
        lost_edits: bool,
    },
    /// Result older than one already applied, or about an unknown id.
    Ignored,
}

/// Non-fatal notice for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A record under edit was deleted upstream; local changes are gone.
    LocalChangesLost {
        /// Kind of the record.
        kind: Kind,
        /// Deleted id.
        id: RecordId,
    },
}

/// Change notification published by the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A new entry appeared, from a reload or a new draft.
    Inserted {
        /// Kind the entry belongs to.
        kind: Kind,
        /// Record id, or draft key for unsaved drafts.
        key: EntryKey,
    },
    /// An entry's value or state changed.
    Changed {
        /// Kind the entry belongs to.
        kind: Kind,
        /// Key after the change; a saved draft reports its new record key.
        key: EntryKey,
        /// State the entry is in now.
        state: DirtyState,
    },
    /// A reload collided with a local edit.
    Conflicted {
        /// Kind the entry belongs to.
        kind: Kind,
        /// Entry whose working value now differs from a newer server value.
        key: EntryKey,
    },
    /// An entry was removed, by delete, discard, or upstream deletion.
    Removed {
        /// Kind the entry belonged to.
        kind: Kind,
        /// Key that no longer resolves.
        key: EntryKey,
    },
    /// A saved draft received its server id.
    Rekeyed {
        /// Kind the entry belongs to.
        kind: Kind,
        /// Draft key the caller held until now.
        from: EntryKey,
        /// Record key to use from now on.
        to: EntryKey,
    },
    /// Non-fatal notice.
    Notice(Notice),
    /// Every entry was dropped.
    Reset,
}
