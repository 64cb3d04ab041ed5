//! Graph view of a stage's ordered waves.
//!
//! Everything here is pure: functions take a graph value and return a new one.

/// Immutable chain mutators.
pub mod edit;
/// Graph types, list/graph conversion, and chain validation.
pub mod graph;
