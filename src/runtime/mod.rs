//! Single-writer async runtime, pollers, and session wiring.

/// Event stream types emitted by the runtime.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;
/// Health and game-state pollers.
pub mod poll;
/// Composition root owning gateway, channel, loop, and pollers.
pub mod session;
