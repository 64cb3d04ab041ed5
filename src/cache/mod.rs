//! Local record cache with dirty-state tracking.

/// Entry, dirty state, and cache event types.
pub mod entry;
/// The cache itself and its merge rules.
pub mod store;
