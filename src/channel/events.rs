//! Push-channel payloads: raw SSE frames, decoded server events, and the
//! events fanned out to subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ConnectionState, Kind, RecordId, Revision};

/// One SSE frame as received from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// `event:` field; empty for unnamed messages.
    pub event: String,
    /// `data:` field.
    pub data: String,
}

/// Invalidation of one record, or of a whole kind when `affected_id` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReloadEvent {
    /// Collection whose server files changed.
    pub kind: Kind,
    /// Invalidated record; `None` means refetch the whole collection.
    pub affected_id: Option<RecordId>,
    /// Per-kind monotonic revision assigned on receipt.
    pub revision: Revision,
}

/// Everything a channel subscriber observes, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Connection state changed.
    State(ConnectionState),
    /// One kind (or one record of it) changed on the server.
    Reload(ReloadEvent),
    /// Broad invalidation: resynchronize every kind.
    ResyncAll,
}

/// Decoded server notification, before revision assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// `file_changed`: any definition file changed.
    FileChanged {
        /// Changed file, when reported.
        file: Option<String>,
    },
    /// `<kind>_reloaded|created|updated|deleted|imported`.
    KindChanged {
        /// Kind named by the event prefix.
        kind: Kind,
        /// Affected record, when it can be determined.
        affected_id: Option<RecordId>,
    },
}

const KIND_SUFFIXES: [&str; 5] = ["reloaded", "created", "updated", "deleted", "imported"];

/// Decodes a raw frame. Unknown event names decode to `None`.
pub fn decode_server_event(raw: &RawEvent) -> Option<ServerEvent> {
    let payload = payload_of(&raw.data);

    if raw.event == "file_changed" {
        let file = payload
            .as_ref()
            .and_then(|p| p.get("file"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Some(ServerEvent::FileChanged { file });
    }

    let (prefix, suffix) = raw.event.rsplit_once('_')?;
    if !KIND_SUFFIXES.contains(&suffix) {
        return None;
    }
    let kind = Kind::from_event_prefix(prefix)?;
    let affected_id = payload.as_ref().and_then(affected_id_of);
    Some(ServerEvent::KindChanged { kind, affected_id })
}

/// Unwraps the `{"type", "timestamp", "data"}` envelope when present.
fn payload_of(data: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(data).ok()?;
    match value.get("data") {
        Some(inner) if value.get("type").is_some() => Some(inner.clone()),
        _ => Some(value),
    }
}

/// Finds the single affected id: `id`, a one-element `ids`, or the file stem.
fn affected_id_of(payload: &Value) -> Option<RecordId> {
    if let Some(id) = payload.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        return Some(id.to_string());
    }
    if let Some(ids) = payload.get("ids").and_then(Value::as_array) {
        return match ids.as_slice() {
            [only] => only.as_str().filter(|s| !s.is_empty()).map(str::to_string),
            _ => None,
        };
    }
    payload
        .get("file")
        .and_then(Value::as_str)
        .and_then(id_from_file)
}

/// `assets/definitions/characters/char_1.character.json` -> `char_1`.
pub fn id_from_file(path: &str) -> Option<RecordId> {
    let name = path.rsplit(['/', '\\']).next()?;
    let stem = name.split('.').next()?;
    (!stem.is_empty()).then(|| stem.to_string())
}
