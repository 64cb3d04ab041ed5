//! Runtime event stream payloads.

use crate::{
    cache::entry::CacheEvent,
    types::{ConnectionState, Kind, RecordId},
};

/// Events emitted from the single-writer sync loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The cache changed.
    Cache(CacheEvent),
    /// The push channel changed state.
    Connection(ConnectionState),
    /// A reload fetch failed; cached values were kept.
    ReloadFailed {
        /// Kind whose fetch failed.
        kind: Kind,
        /// Affected id, or `None` for a kind-wide reload.
        id: Option<RecordId>,
        /// Rendered gateway error.
        error: String,
    },
    /// Every loaded kind is being refetched.
    ResyncStarted,
}
