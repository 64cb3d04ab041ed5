use hashbrown::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    gateway::{GatewayError, GatewayResult},
    patch::RecordPatch,
    record::DefinitionRecord,
    types::{DraftId, EntryKey, Kind, RecordId, Revision},
};

use super::entry::{
    CacheEntry, CacheEvent, DirtyState, FetchOutcome, MergeOutcome, Notice, Resolution, SaveRequest,
};

/// Rejected cache operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// No entry under this key.
    #[error("{0} entry {1} is not cached")]
    MissingEntry(Kind, EntryKey),
    /// A write for the entry is outstanding.
    #[error("{0} entry {1} already has a save in flight")]
    SaveInFlight(Kind, EntryKey),
    /// Save requested for an entry without local changes.
    #[error("{0} entry {1} has no local changes")]
    NothingToSave(Kind, EntryKey),
    /// Save requested while a conflict awaits resolution.
    #[error("{0} entry {1} is in conflict; resolve it before saving")]
    Conflict(Kind, EntryKey),
    /// Resolution requested for an entry that is not in conflict.
    #[error("{0} entry {1} is not in conflict")]
    NotInConflict(Kind, EntryKey),
    /// Patch targets another kind.
    #[error("patch for {got} applied to a {expected} entry")]
    KindMismatch {
        /// Kind of the targeted entry.
        expected: Kind,
        /// Kind the patch was built for.
        got: Kind,
    },
    /// Patch could not be encoded into the record.
    #[error("patch failed: {0}")]
    Patch(String),
    /// Server write failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Position in the cache's change history; see [`RecordCache::sequence`].
pub type Sequence = u64;

#[derive(Debug, Default)]
struct KindState {
    entries: HashMap<EntryKey, CacheEntry>,
    order: Vec<EntryKey>,
    // sequence at which each entry's server value was last written
    synced: HashMap<EntryKey, Sequence>,
    applied_revision: Revision,
    loaded: bool,
}

impl KindState {
    fn insert(&mut self, entry: CacheEntry, seq: Sequence) {
        if !self.entries.contains_key(&entry.key) {
            self.order.push(entry.key.clone());
        }
        self.synced.insert(entry.key.clone(), seq);
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &EntryKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.synced.remove(key);
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(entry)
    }

    /// True when the entry's server value was written after `issued_at`.
    fn synced_after(&self, key: &EntryKey, issued_at: Sequence) -> bool {
        self.synced.get(key).is_some_and(|seq| *seq > issued_at)
    }
}

/// Per-kind record cache with dirty tracking.
///
/// All mutation goes through these methods so the [`DirtyState`] machine
/// cannot be bypassed. Change notifications accumulate until drained with
/// [`RecordCache::drain_events`].
#[derive(Debug, Default)]
pub struct RecordCache {
    kinds: [KindState; Kind::COUNT],
    next_draft: DraftId,
    seq: Sequence,
    pending_events: Vec<CacheEvent>,
}

impl RecordCache {
    /// Empty cache; no kind is loaded.
    pub fn new() -> Self {
        Self {
            next_draft: 1,
            ..Self::default()
        }
    }

    /// Entries of `kind` in insertion order.
    pub fn snapshot(&self, kind: Kind) -> Vec<CacheEntry> {
        let ks = self.kind(kind);
        ks.order
            .iter()
            .filter_map(|key| ks.entries.get(key).cloned())
            .collect()
    }

    /// Server ids currently held for `kind`, in insertion order.
    pub fn record_ids(&self, kind: Kind) -> Vec<RecordId> {
        self.kind(kind)
            .order
            .iter()
            .filter_map(|key| key.record_id().map(str::to_string))
            .collect()
    }

    /// Borrows one entry.
    pub fn select(&self, kind: Kind, key: &EntryKey) -> Option<&CacheEntry> {
        self.kind(kind).entries.get(key)
    }

    /// True once a full listing of `kind` has been applied.
    pub fn is_loaded(&self, kind: Kind) -> bool {
        self.kind(kind).loaded
    }

    /// Kinds with an applied listing.
    pub fn loaded_kinds(&self) -> Vec<Kind> {
        Kind::ALL.into_iter().filter(|k| self.is_loaded(*k)).collect()
    }

    /// Current change sequence.
    ///
    /// Capture it when a listing request is issued and hand it to
    /// [`Self::apply_listing`], so that the listing cannot undo server values
    /// written while it was in flight.
    pub fn sequence(&self) -> Sequence {
        self.seq
    }

    /// Highest reload revision applied for `kind`.
    pub fn applied_revision(&self, kind: Kind) -> Revision {
        self.kind(kind).applied_revision
    }

    /// Replaces the working value. `Clean` becomes `Editing`; `Conflict` stays.
    pub fn begin_edit(
        &mut self,
        kind: Kind,
        key: &EntryKey,
        mut working: DefinitionRecord,
    ) -> Result<(), CacheError> {
        let entry = self.entry_mut(kind, key)?;
        if entry.save_in_flight {
            return Err(CacheError::SaveInFlight(kind, key.clone()));
        }
        match key {
            EntryKey::Record(id) => {
                if working.id() != Some(id.as_str()) {
                    working.set_id(id.clone());
                }
            }
            EntryKey::Draft(_) => {}
        }
        entry.working = working;
        if entry.state == DirtyState::Clean {
            entry.state = DirtyState::Editing;
        }
        let state = entry.state;
        self.emit(CacheEvent::Changed {
            kind,
            key: key.clone(),
            state,
        });
        Ok(())
    }

    /// Applies a typed patch to the working value, then behaves like [`Self::begin_edit`].
    pub fn apply_patch(&mut self, kind: Kind, key: &EntryKey, patch: &RecordPatch) -> Result<(), CacheError> {
        if patch.kind() != kind {
            return Err(CacheError::KindMismatch {
                expected: kind,
                got: patch.kind(),
            });
        }
        let mut working = self
            .select(kind, key)
            .ok_or_else(|| CacheError::MissingEntry(kind, key.clone()))?
            .working
            .clone();
        patch
            .apply_to(&mut working)
            .map_err(|e| CacheError::Patch(e.to_string()))?;
        self.begin_edit(kind, key, working)
    }

    /// Drops local changes. Drafts are removed outright.
    pub fn discard_edit(&mut self, kind: Kind, key: &EntryKey) -> Result<(), CacheError> {
        let entry = self.entry_mut(kind, key)?;
        if entry.save_in_flight {
            return Err(CacheError::SaveInFlight(kind, key.clone()));
        }
        match entry.server.clone() {
            Some(server) => {
                if entry.state == DirtyState::Clean {
                    return Ok(());
                }
                entry.working = server;
                entry.state = DirtyState::Clean;
                self.emit(CacheEvent::Changed {
                    kind,
                    key: key.clone(),
                    state: DirtyState::Clean,
                });
            }
            None => {
                self.kind_mut(kind).remove(key);
                self.emit(CacheEvent::Removed {
                    kind,
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Adds a draft in `Editing` built from `template` with its id cleared.
    pub fn create_draft(&mut self, kind: Kind, mut template: DefinitionRecord) -> EntryKey {
        template.clear_id();
        let key = EntryKey::Draft(self.next_draft);
        self.next_draft += 1;
        let seq = self.bump();
        self.kind_mut(kind).insert(
            CacheEntry {
                key: key.clone(),
                server: None,
                working: template,
                state: DirtyState::Editing,
                save_in_flight: false,
            },
            seq,
        );
        self.emit(CacheEvent::Inserted {
            kind,
            key: key.clone(),
        });
        key
    }

    /// Moves an `Editing` entry to `Saving` and returns the write to issue.
    ///
    /// At most one write per entry may be outstanding.
    pub fn begin_save(&mut self, kind: Kind, key: &EntryKey) -> Result<SaveRequest, CacheError> {
        let entry = self.entry_mut(kind, key)?;
        if entry.save_in_flight {
            return Err(CacheError::SaveInFlight(kind, key.clone()));
        }
        match entry.state {
            DirtyState::Editing => {}
            DirtyState::Conflict => {
                return Err(CacheError::Conflict(kind, key.clone()));
            }
            DirtyState::Clean | DirtyState::Saving => {
                return Err(CacheError::NothingToSave(kind, key.clone()));
            }
        }

        let record = entry.working.clone();
        let request = match key {
            EntryKey::Record(id) => SaveRequest::Update {
                id: id.clone(),
                record,
            },
            EntryKey::Draft(_) => SaveRequest::Create { record },
        };
        entry.state = DirtyState::Saving;
        entry.save_in_flight = true;
        self.emit(CacheEvent::Changed {
            kind,
            key: key.clone(),
            state: DirtyState::Saving,
        });
        Ok(request)
    }

    /// Applies the outcome of a write started by [`Self::begin_save`].
    ///
    /// Success lands `Clean` with server = working = response and returns the
    /// entry's (possibly new) key. Failure keeps the working value, returns
    /// to `Editing` (or `Conflict` if a reload collided meanwhile), and
    /// surfaces the error.
    pub fn complete_save(
        &mut self,
        kind: Kind,
        key: &EntryKey,
        result: GatewayResult<DefinitionRecord>,
    ) -> Result<EntryKey, CacheError> {
        let result = result.and_then(|rec| match rec.id() {
            Some(_) => Ok(rec),
            None => Err(GatewayError::Invalid("saved record has no id".to_string())),
        });

        let seq = self.bump();
        let ks = self.kind_mut(kind);
        let Some(entry) = ks.entries.get_mut(key) else {
            debug!(%kind, %key, "save finished for an entry that is gone");
            return match result {
                Ok(rec) => Ok(EntryKey::Record(rec.id().unwrap_or_default().to_string())),
                Err(err) => Err(err.into()),
            };
        };
        entry.save_in_flight = false;

        match result {
            Ok(rec) => {
                let new_key = EntryKey::Record(rec.id().unwrap_or_default().to_string());
                entry.server = Some(rec.clone());
                entry.working = rec;
                entry.state = DirtyState::Clean;
                ks.synced.insert(key.clone(), seq);
                if &new_key != key {
                    self.rekey(kind, key, new_key.clone());
                }
                info!(%kind, key = %new_key, "saved");
                self.emit(CacheEvent::Changed {
                    kind,
                    key: new_key.clone(),
                    state: DirtyState::Clean,
                });
                Ok(new_key)
            }
            Err(err) => {
                entry.state = if entry.state == DirtyState::Conflict {
                    DirtyState::Conflict
                } else {
                    DirtyState::Editing
                };
                let state = entry.state;
                warn!(%kind, %key, error = %err, "save failed; edit buffer kept");
                self.emit(CacheEvent::Changed {
                    kind,
                    key: key.clone(),
                    state,
                });
                Err(err.into())
            }
        }
    }

    /// Leaves `Conflict` per the user's choice.
    pub fn resolve_conflict(
        &mut self,
        kind: Kind,
        key: &EntryKey,
        resolution: Resolution,
    ) -> Result<(), CacheError> {
        let entry = self.entry_mut(kind, key)?;
        if entry.save_in_flight {
            return Err(CacheError::SaveInFlight(kind, key.clone()));
        }
        if entry.state != DirtyState::Conflict {
            return Err(CacheError::NotInConflict(kind, key.clone()));
        }
        let state = match (resolution, entry.server.clone()) {
            (Resolution::TakeTheirs, Some(server)) => {
                entry.working = server;
                DirtyState::Clean
            }
            _ => DirtyState::Editing,
        };
        entry.state = state;
        debug!(%kind, %key, ?resolution, "conflict resolved");
        self.emit(CacheEvent::Changed {
            kind,
            key: key.clone(),
            state,
        });
        Ok(())
    }

    /// Drops an entry regardless of its state (delete wins).
    pub fn remove(&mut self, kind: Kind, key: &EntryKey) -> Option<CacheEntry> {
        let removed = self.kind_mut(kind).remove(key)?;
        self.emit(CacheEvent::Removed {
            kind,
            key: key.clone(),
        });
        Some(removed)
    }

    /// Merges a reload fetch for one id.
    ///
    /// `revision` orders reload results per kind; a result older than one
    /// already applied is ignored.
    pub fn apply_fetched(
        &mut self,
        kind: Kind,
        id: &str,
        outcome: FetchOutcome,
        revision: Option<Revision>,
    ) -> MergeOutcome {
        if let Some(rev) = revision {
            let ks = self.kind_mut(kind);
            if rev < ks.applied_revision {
                debug!(%kind, id, rev, applied = ks.applied_revision, "stale reload result ignored");
                return MergeOutcome::Ignored;
            }
            ks.applied_revision = rev;
        }

        let key = EntryKey::Record(id.to_string());
        match outcome {
            FetchOutcome::Found(mut rec) => {
                if rec.id() != Some(id) {
                    rec.set_id(id);
                }
                self.merge_found(kind, key, rec)
            }
            FetchOutcome::Gone => self.merge_gone(kind, key),
        }
    }

    /// Applies a full collection listing issued at sequence `issued_at`.
    ///
    /// Listings may carry summaries only, so no listed value is cached. Held
    /// ids missing from the listing are treated as deleted upstream. Returns
    /// the listed ids whose full values should be fetched and passed to
    /// [`Self::apply_fetched`].
    ///
    /// Entries whose server value was written after `issued_at` (a save or
    /// reload that finished while the listing was in flight) are newer than
    /// the listing: they are neither removed nor returned for refetch.
    pub fn apply_listing(
        &mut self,
        kind: Kind,
        listed: Vec<DefinitionRecord>,
        revision: Option<Revision>,
        issued_at: Sequence,
    ) -> Vec<RecordId> {
        if let Some(rev) = revision {
            let ks = self.kind_mut(kind);
            ks.applied_revision = ks.applied_revision.max(rev);
        }

        let mut listed_ids: HashSet<RecordId> = HashSet::new();
        let mut refetch = Vec::new();
        for rec in listed {
            let Some(id) = rec.id().map(str::to_string) else {
                warn!(%kind, "listing contained a record without id");
                continue;
            };
            if !listed_ids.insert(id.clone()) {
                continue;
            }
            if self.kind(kind).synced_after(&EntryKey::Record(id.clone()), issued_at) {
                debug!(%kind, %id, "entry newer than listing; not refetched");
                continue;
            }
            refetch.push(id);
        }

        let ks = self.kind(kind);
        let vanished: Vec<EntryKey> = ks
            .order
            .iter()
            .filter(|k| matches!(k, EntryKey::Record(id) if !listed_ids.contains(id)))
            .filter(|k| !ks.synced_after(k, issued_at))
            .cloned()
            .collect();
        for key in vanished {
            self.merge_gone(kind, key);
        }

        self.kind_mut(kind).loaded = true;
        refetch
    }

    /// Drops every entry of every kind.
    pub fn reset(&mut self) {
        for ks in &mut self.kinds {
            *ks = KindState::default();
        }
        self.emit(CacheEvent::Reset);
    }

    /// Takes the change notifications accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<CacheEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn merge_found(&mut self, kind: Kind, key: EntryKey, rec: DefinitionRecord) -> MergeOutcome {
        let seq = self.bump();
        let ks = self.kind_mut(kind);
        let Some(entry) = ks.entries.get_mut(&key) else {
            ks.insert(CacheEntry::clean(key.clone(), rec), seq);
            self.emit(CacheEvent::Inserted { kind, key });
            return MergeOutcome::Inserted;
        };

        if entry.server.as_ref() == Some(&rec) {
            return MergeOutcome::Unchanged;
        }
        ks.synced.insert(key.clone(), seq);

        match entry.state {
            DirtyState::Clean => {
                entry.server = Some(rec.clone());
                entry.working = rec;
                self.emit(CacheEvent::Changed {
                    kind,
                    key,
                    state: DirtyState::Clean,
                });
                MergeOutcome::Replaced
            }
            DirtyState::Editing if entry.working == rec => {
                entry.server = Some(rec);
                entry.state = DirtyState::Clean;
                self.emit(CacheEvent::Changed {
                    kind,
                    key,
                    state: DirtyState::Clean,
                });
                MergeOutcome::Replaced
            }
            DirtyState::Editing | DirtyState::Saving | DirtyState::Conflict => {
                entry.server = Some(rec);
                entry.state = DirtyState::Conflict;
                warn!(%kind, %key, "server changed under a local edit; conflict");
                self.emit(CacheEvent::Conflicted { kind, key });
                MergeOutcome::Conflicted
            }
        }
    }

    fn merge_gone(&mut self, kind: Kind, key: EntryKey) -> MergeOutcome {
        let Some(entry) = self.kind_mut(kind).remove(&key) else {
            return MergeOutcome::Ignored;
        };
        let lost_edits = entry.state.has_local_changes();
        self.emit(CacheEvent::Removed {
            kind,
            key: key.clone(),
        });
        if lost_edits {
            let id = key.record_id().unwrap_or_default().to_string();
            warn!(%kind, %id, "record deleted upstream; local changes lost");
            self.emit(CacheEvent::Notice(Notice::LocalChangesLost { kind, id }));
        }
        MergeOutcome::Removed { lost_edits }
    }

    fn rekey(&mut self, kind: Kind, from: &EntryKey, to: EntryKey) {
        let ks = self.kind_mut(kind);
        let Some(mut entry) = ks.entries.remove(from) else {
            return;
        };
        if let Some(seq) = ks.synced.remove(from) {
            ks.synced.insert(to.clone(), seq);
        }
        entry.key = to.clone();
        if ks.entries.contains_key(&to) {
            if let Some(pos) = ks.order.iter().position(|k| *k == to) {
                ks.order.remove(pos);
            }
        }
        if let Some(pos) = ks.order.iter().position(|k| k == from) {
            ks.order[pos] = to.clone();
        } else {
            ks.order.push(to.clone());
        }
        ks.entries.insert(to.clone(), entry);
        self.emit(CacheEvent::Rekeyed {
            kind,
            from: from.clone(),
            to,
        });
    }

    fn bump(&mut self) -> Sequence {
        self.seq += 1;
        self.seq
    }

    fn entry_mut(&mut self, kind: Kind, key: &EntryKey) -> Result<&mut CacheEntry, CacheError> {
        self.kinds[kind.index()]
            .entries
            .get_mut(key)
            .ok_or_else(|| CacheError::MissingEntry(kind, key.clone()))
    }

    fn kind(&self, kind: Kind) -> &KindState {
        &self.kinds[kind.index()]
    }

    fn kind_mut(&mut self, kind: Kind) -> &mut KindState {
        &mut self.kinds[kind.index()]
    }

    fn emit(&mut self, event: CacheEvent) {
        self.pending_events.push(event);
    }
}
