//! Reconnecting push channel and its event types.

/// Raw frames, decoded server events, and subscriber events.
pub mod events;
/// Channel task, reconnect loop, and SSE connector.
pub mod handle;
