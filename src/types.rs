//! Shared primitive IDs, content kinds, and connection states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-assigned record identifier.
pub type RecordId = String;
/// Monotonic per-kind reload revision.
pub type Revision = u64;
/// Local identifier for a draft that has no server identity yet.
pub type DraftId = u64;

/// Content category of a definition record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Playable and enemy characters.
    Character,
    /// Stages and their wave sequences.
    Stage,
    /// UI layouts.
    UiLayout,
    /// Skills.
    Skill,
    /// Sounds.
    Sound,
    /// Visual effects.
    Effect,
}

impl Kind {
    /// Number of kinds.
    pub const COUNT: usize = 6;

    /// Every kind, in display order.
    pub const ALL: [Kind; Kind::COUNT] = [
        Kind::Character,
        Kind::Stage,
        Kind::UiLayout,
        Kind::Skill,
        Kind::Sound,
        Kind::Effect,
    ];

    /// REST collection path for this kind.
    pub fn collection_path(self) -> &'static str {
        match self {
            Kind::Character => "/api/characters",
            Kind::Stage => "/api/stages",
            Kind::UiLayout => "/api/ui",
            Kind::Skill => "/api/skills",
            Kind::Sound => "/api/sounds",
            Kind::Effect => "/api/effects",
        }
    }

    /// Prefix used by server push event names (`character_reloaded`, `ui_deleted`, ...).
    pub fn event_prefix(self) -> &'static str {
        match self {
            Kind::Character => "character",
            Kind::Stage => "stage",
            Kind::UiLayout => "ui",
            Kind::Skill => "skill",
            Kind::Sound => "sound",
            Kind::Effect => "effect",
        }
    }

    /// Resolves an event-name prefix back to a kind.
    pub fn from_event_prefix(prefix: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.event_prefix() == prefix)
    }

    /// Index into per-kind arrays.
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Character => "character",
            Kind::Stage => "stage",
            Kind::UiLayout => "ui_layout",
            Kind::Skill => "skill",
            Kind::Sound => "sound",
            Kind::Effect => "effect",
        };
        f.write_str(name)
    }
}

/// Key of a cache entry: either a server record or a local draft.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKey {
    /// Record known to the server under this id.
    Record(RecordId),
    /// Draft created locally and not yet saved.
    Draft(DraftId),
}

impl EntryKey {
    /// Returns the server id, if this key names a server record.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            EntryKey::Record(id) => Some(id),
            EntryKey::Draft(_) => None,
        }
    }
}

impl From<&str> for EntryKey {
    fn from(value: &str) -> Self {
        Self::Record(value.to_string())
    }
}

impl From<String> for EntryKey {
    fn from(value: String) -> Self {
        Self::Record(value)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKey::Record(id) => f.write_str(id),
            EntryKey::Draft(n) => write!(f, "draft#{n}"),
        }
    }
}

/// Push-channel connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Opening the push connection.
    Connecting,
    /// Connection open; events are flowing.
    Connected,
    /// Connection lost; a retry is scheduled.
    Reconnecting,
}
