//! Client-side synchronization core for game definition authoring.
//!
//! Definition records (characters, stages, UI layouts, skills, sounds,
//! effects) live on a server that also watches their files. This crate keeps
//! a local cache of those records in step with the server without letting a
//! file-watch reload overwrite an author's unsaved edit.
//!
//! # Examples
//!
//! Dirty-state tracking with [`cache::store::RecordCache`]:
//! ```
//! use defsync::{
//!     cache::{entry::{DirtyState, FetchOutcome}, store::RecordCache},
//!     record::DefinitionRecord,
//!     types::{EntryKey, Kind},
//! };
//! use serde_json::json;
//!
//! let rec = |attack: i64| {
//!     DefinitionRecord::from_value(json!({"id": "char_1", "attack": attack})).expect("object")
//! };
//!
//! let mut cache = RecordCache::new();
//! cache.apply_fetched(Kind::Character, "char_1", FetchOutcome::Found(rec(10)), None);
//! let key = EntryKey::from("char_1");
//! cache.begin_edit(Kind::Character, &key, rec(20)).expect("edit");
//!
//! cache.apply_fetched(Kind::Character, "char_1", FetchOutcome::Found(rec(15)), Some(1));
//! let entry = cache.select(Kind::Character, &key).expect("entry");
//! assert_eq!(entry.state, DirtyState::Conflict);
//! assert_eq!(entry.working, rec(20));
//! ```
//!
//! Live session against a running server:
//! ```no_run
//! use defsync::{config::SyncConfig, runtime::session::Session, types::Kind};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SyncConfig::default().with_env_overrides().expect("config");
//! let session = Session::start(&config).expect("start");
//! session.handle().load(Kind::Stage).await.expect("load stages");
//! for entry in session.handle().snapshot(Kind::Stage).await.expect("snapshot") {
//!     println!("{} {:?}", entry.key, entry.state);
//! }
//! session.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Local record cache and dirty-state machine.
pub mod cache;
/// Push channel with fixed-delay reconnect.
pub mod channel;
/// Configuration loading and validation.
pub mod config;
/// Typed CRUD gateway and its HTTP transport.
pub mod gateway;
/// Typed per-kind record patches.
pub mod patch;
/// Opaque definition records and the stage wave view.
pub mod record;
/// Single-writer sync runtime, pollers, and session wiring.
pub mod runtime;
/// Wave list/graph conversion and chain-preserving edits.
pub mod sequence;
/// Shared primitive types and enums.
pub mod types;
