use std::sync::Arc;

use futures::{StreamExt, stream};
use hashbrown::HashMap;
use thiserror::Error;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, oneshot,
};
use tracing::{debug, info, warn};

use crate::{
    cache::{
        entry::{CacheEntry, FetchOutcome, Resolution, SaveRequest},
        store::{CacheError, RecordCache, Sequence},
    },
    channel::events::{ChannelEvent, ReloadEvent},
    config::SyncConfig,
    gateway::{GatewayError, GatewayResult, RecordGateway},
    patch::RecordPatch,
    record::DefinitionRecord,
    types::{ConnectionState, EntryKey, Kind, RecordId, Revision},
};

use super::events::SyncEvent;

/// Failures reported to [`SyncHandle`] callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The cache rejected the operation.
    #[error(transparent)]
    Cache(CacheError),
    /// The server call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The sync loop is gone.
    #[error("sync runtime has shut down")]
    ChannelClosed,
}

impl From<CacheError> for RuntimeError {
    fn from(value: CacheError) -> Self {
        match value {
            CacheError::Gateway(err) => Self::Gateway(err),
            other => Self::Cache(other),
        }
    }
}

/// Queue sizes of the sync loop.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Bound of the command queue.
    pub command_buffer: usize,
    /// Capacity of the [`SyncEvent`] broadcast.
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_buffer: 256,
            event_buffer: 1024,
        }
    }
}

impl From<&SyncConfig> for RuntimeConfig {
    fn from(value: &SyncConfig) -> Self {
        Self {
            event_buffer: value.event_buffer,
            ..Self::default()
        }
    }
}

/// Cloneable front end of the sync loop.
///
/// Every cache read and mutation is a message to the single task that owns
/// the [`RecordCache`]; gateway calls run beside it and report back.
#[derive(Clone)]
pub struct SyncHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<SyncEvent>,
}

type Waiter = oneshot::Sender<Result<(), RuntimeError>>;

enum Command {
    Load {
        kind: Kind,
        resp: Waiter,
    },
    Refresh {
        kind: Kind,
        id: RecordId,
        resp: Waiter,
    },
    Snapshot {
        kind: Kind,
        resp: oneshot::Sender<Vec<CacheEntry>>,
    },
    Select {
        kind: Kind,
        key: EntryKey,
        resp: oneshot::Sender<Option<CacheEntry>>,
    },
    BeginEdit {
        kind: Kind,
        key: EntryKey,
        working: DefinitionRecord,
        resp: Waiter,
    },
    Edit {
        kind: Kind,
        key: EntryKey,
        patch: RecordPatch,
        resp: Waiter,
    },
    DiscardEdit {
        kind: Kind,
        key: EntryKey,
        resp: Waiter,
    },
    Save {
        kind: Kind,
        key: EntryKey,
        resp: oneshot::Sender<Result<EntryKey, RuntimeError>>,
    },
    CreateDraft {
        kind: Kind,
        template: DefinitionRecord,
        resp: oneshot::Sender<EntryKey>,
    },
    Delete {
        kind: Kind,
        key: EntryKey,
        resp: Waiter,
    },
    ResolveConflict {
        kind: Kind,
        key: EntryKey,
        resolution: Resolution,
        resp: Waiter,
    },
    ResyncAll {
        resp: oneshot::Sender<()>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

enum Completion {
    Saved {
        kind: Kind,
        key: EntryKey,
        result: GatewayResult<DefinitionRecord>,
        resp: oneshot::Sender<Result<EntryKey, RuntimeError>>,
    },
    Deleted {
        kind: Kind,
        key: EntryKey,
        result: GatewayResult<()>,
        resp: Waiter,
    },
    Reloaded {
        kind: Kind,
        revision: Option<Revision>,
        fetched: Fetched,
        waiters: Vec<Waiter>,
    },
}

enum Fetched {
    Kind {
        listing: GatewayResult<Vec<DefinitionRecord>>,
        details: Vec<(RecordId, GatewayResult<DefinitionRecord>)>,
        issued_at: Sequence,
    },
    Ids(Vec<(RecordId, GatewayResult<DefinitionRecord>)>),
}

/// Full-record reads issued concurrently after a kind-wide listing.
const DETAIL_FETCH_CONCURRENCY: usize = 8;

/// Pending reload work for one kind. At most one fetch per kind runs at a
/// time; anything arriving meanwhile is merged into the next batch.
#[derive(Default)]
struct ReloadQueue {
    busy: bool,
    whole_kind: bool,
    ids: Vec<RecordId>,
    revision: Option<Revision>,
    waiters: Vec<Waiter>,
}

impl ReloadQueue {
    fn push(&mut self, target: Option<RecordId>, revision: Option<Revision>, waiter: Option<Waiter>) {
        match target {
            None => {
                self.whole_kind = true;
                self.ids.clear();
            }
            Some(id) => {
                if !self.whole_kind && !self.ids.contains(&id) {
                    self.ids.push(id);
                }
            }
        }
        self.revision = self.revision.max(revision);
        self.waiters.extend(waiter);
    }

    fn is_pending(&self) -> bool {
        self.whole_kind || !self.ids.is_empty()
    }
}

/// Starts the sync loop on the current tokio runtime.
///
/// `channel` is usually [`crate::channel::handle::NotificationChannel::subscribe`];
/// without it the cache only changes through handle calls.
pub fn spawn_sync(
    cache: RecordCache,
    gateway: Arc<RecordGateway>,
    channel: Option<broadcast::Receiver<ChannelEvent>>,
    config: RuntimeConfig,
) -> SyncHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_buffer.max(1));
    let (events_tx, _) = broadcast::channel::<SyncEvent>(config.event_buffer.max(1));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();

    let mut sync = SyncLoop {
        cache,
        gateway,
        events_tx: events_tx.clone(),
        done_tx,
        queues: Default::default(),
        connected_once: false,
    };
    let mut channel_rx = channel;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if sync.handle_command(cmd) {
                        sync.publish();
                        break;
                    }
                }
                done = done_rx.recv() => {
                    if let Some(done) = done {
                        sync.handle_completion(done);
                    }
                }
                event = next_channel_event(&mut channel_rx) => {
                    match event {
                        Ok(event) => sync.handle_channel_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "push events dropped; resynchronizing");
                            sync.resync_all();
                        }
                        Err(RecvError::Closed) => {
                            debug!("push channel closed");
                            channel_rx = None;
                        }
                    }
                }
            }
            sync.publish();
        }
        info!("sync runtime stopped");
    });

    SyncHandle { cmd_tx, events_tx }
}

async fn next_channel_event(
    rx: &mut Option<broadcast::Receiver<ChannelEvent>>,
) -> Result<ChannelEvent, RecvError> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SyncHandle {
    /// Subscribes to cache, connection, and reload-failure events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    /// Fetches the full collection of `kind` and starts tracking its reloads.
    pub async fn load(&self, kind: Kind) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Load { kind, resp }).await?
    }

    /// Fetches one record now and merges it like a reload.
    pub async fn refresh(&self, kind: Kind, id: impl Into<RecordId>) -> Result<(), RuntimeError> {
        let id = id.into();
        self.call(|resp| Command::Refresh { kind, id, resp }).await?
    }

    /// Entries of `kind` in insertion order.
    pub async fn snapshot(&self, kind: Kind) -> Result<Vec<CacheEntry>, RuntimeError> {
        self.call(|resp| Command::Snapshot { kind, resp }).await
    }

    /// One entry, if cached.
    pub async fn select(&self, kind: Kind, key: impl Into<EntryKey>) -> Result<Option<CacheEntry>, RuntimeError> {
        let key = key.into();
        self.call(|resp| Command::Select { kind, key, resp }).await
    }

    /// Replaces the working value of an entry.
    pub async fn begin_edit(
        &self,
        kind: Kind,
        key: impl Into<EntryKey>,
        working: DefinitionRecord,
    ) -> Result<(), RuntimeError> {
        let key = key.into();
        self.call(|resp| Command::BeginEdit {
            kind,
            key,
            working,
            resp,
        })
        .await?
    }

    /// Applies a typed patch to the working value of an entry.
    pub async fn edit(&self, kind: Kind, key: impl Into<EntryKey>, patch: RecordPatch) -> Result<(), RuntimeError> {
        let key = key.into();
        self.call(|resp| Command::Edit {
            kind,
            key,
            patch,
            resp,
        })
        .await?
    }

    /// Reverts an entry to its server value; drafts are dropped.
    pub async fn discard_edit(&self, kind: Kind, key: impl Into<EntryKey>) -> Result<(), RuntimeError> {
        let key = key.into();
        self.call(|resp| Command::DiscardEdit { kind, key, resp }).await?
    }

    /// Writes an `Editing` entry and waits for the server's answer.
    ///
    /// Returns the entry's key afterwards, which differs from `key` when a
    /// draft was created. A second save while one is in flight fails with
    /// [`CacheError::SaveInFlight`].
    pub async fn save(&self, kind: Kind, key: impl Into<EntryKey>) -> Result<EntryKey, RuntimeError> {
        let key = key.into();
        self.call(|resp| Command::Save { kind, key, resp }).await?
    }

    /// Adds a local draft built from `template`.
    pub async fn create_draft(&self, kind: Kind, template: DefinitionRecord) -> Result<EntryKey, RuntimeError> {
        self.call(|resp| Command::CreateDraft { kind, template, resp })
            .await
    }

    /// Deletes on the server, then drops the entry whatever its state.
    pub async fn delete(&self, kind: Kind, key: impl Into<EntryKey>) -> Result<(), RuntimeError> {
        let key = key.into();
        self.call(|resp| Command::Delete { kind, key, resp }).await?
    }

    /// Leaves `Conflict` per the user's choice.
    pub async fn resolve_conflict(
        &self,
        kind: Kind,
        key: impl Into<EntryKey>,
        resolution: Resolution,
    ) -> Result<(), RuntimeError> {
        let key = key.into();
        self.call(|resp| Command::ResolveConflict {
            kind,
            key,
            resolution,
            resp,
        })
        .await?
    }

    /// Refetches every loaded kind.
    pub async fn resync_all(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::ResyncAll { resp }).await
    }

    /// Stops the loop. In-flight server calls finish without being applied.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Shutdown { resp }).await
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

struct SyncLoop {
    cache: RecordCache,
    gateway: Arc<RecordGateway>,
    events_tx: broadcast::Sender<SyncEvent>,
    done_tx: mpsc::UnboundedSender<Completion>,
    queues: [ReloadQueue; Kind::COUNT],
    connected_once: bool,
}

impl SyncLoop {
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Load { kind, resp } => self.enqueue(kind, None, None, Some(resp)),
            Command::Refresh { kind, id, resp } => self.enqueue(kind, Some(id), None, Some(resp)),
            Command::Snapshot { kind, resp } => {
                let _ = resp.send(self.cache.snapshot(kind));
            }
            Command::Select { kind, key, resp } => {
                let _ = resp.send(self.cache.select(kind, &key).cloned());
            }
            Command::BeginEdit {
                kind,
                key,
                working,
                resp,
            } => {
                let res = self.cache.begin_edit(kind, &key, working);
                let _ = resp.send(res.map_err(RuntimeError::from));
            }
            Command::Edit {
                kind,
                key,
                patch,
                resp,
            } => {
                let res = self.cache.apply_patch(kind, &key, &patch);
                let _ = resp.send(res.map_err(RuntimeError::from));
            }
            Command::DiscardEdit { kind, key, resp } => {
                let res = self.cache.discard_edit(kind, &key);
                let _ = resp.send(res.map_err(RuntimeError::from));
            }
            Command::Save { kind, key, resp } => match self.cache.begin_save(kind, &key) {
                Ok(request) => self.spawn_save(kind, key, request, resp),
                Err(err) => {
                    let _ = resp.send(Err(err.into()));
                }
            },
            Command::CreateDraft { kind, template, resp } => {
                let _ = resp.send(self.cache.create_draft(kind, template));
            }
            Command::Delete { kind, key, resp } => {
                if key.record_id().is_some() {
                    self.spawn_delete(kind, key, resp);
                } else {
                    let res = match self.cache.remove(kind, &key) {
                        Some(_) => Ok(()),
                        None => Err(RuntimeError::Cache(CacheError::MissingEntry(kind, key))),
                    };
                    let _ = resp.send(res);
                }
            }
            Command::ResolveConflict {
                kind,
                key,
                resolution,
                resp,
            } => {
                let res = self.cache.resolve_conflict(kind, &key, resolution);
                let _ = resp.send(res.map_err(RuntimeError::from));
            }
            Command::ResyncAll { resp } => {
                self.resync_all();
                let _ = resp.send(());
            }
            Command::Shutdown { resp } => {
                let _ = resp.send(());
                return true;
            }
        }
        false
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Saved {
                kind,
                key,
                result,
                resp,
            } => {
                let res = self.cache.complete_save(kind, &key, result);
                let _ = resp.send(res.map_err(RuntimeError::from));
            }
            Completion::Deleted {
                kind,
                key,
                result,
                resp,
            } => {
                let res = match result {
                    Ok(()) | Err(GatewayError::NotFound { .. }) => {
                        self.cache.remove(kind, &key);
                        info!(%kind, %key, "deleted");
                        Ok(())
                    }
                    Err(err) => {
                        warn!(%kind, %key, error = %err, "delete failed");
                        Err(err.into())
                    }
                };
                let _ = resp.send(res);
            }
            Completion::Reloaded {
                kind,
                revision,
                fetched,
                waiters,
            } => {
                self.queues[kind.index()].busy = false;
                let res = self.apply_reload(kind, revision, fetched);
                for waiter in waiters {
                    let _ = waiter.send(res.clone().map_err(RuntimeError::from));
                }
                self.pump(kind);
            }
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::State(state) => {
                self.emit(SyncEvent::Connection(state));
                if state == ConnectionState::Connected {
                    if self.connected_once {
                        info!("push channel reconnected; resynchronizing");
                        self.resync_all();
                    }
                    self.connected_once = true;
                }
            }
            ChannelEvent::Reload(ReloadEvent {
                kind,
                affected_id,
                revision,
            }) => {
                let held = affected_id
                    .as_deref()
                    .is_some_and(|id| self.cache.select(kind, &EntryKey::from(id)).is_some());
                if !self.cache.is_loaded(kind) && !held {
                    debug!(%kind, id = ?affected_id, "reload for an untracked kind ignored");
                    return;
                }
                self.enqueue(kind, affected_id, Some(revision), None);
            }
            ChannelEvent::ResyncAll => self.resync_all(),
        }
    }

    fn resync_all(&mut self) {
        self.emit(SyncEvent::ResyncStarted);
        for kind in self.cache.loaded_kinds() {
            self.enqueue(kind, None, None, None);
        }
    }

    fn enqueue(&mut self, kind: Kind, target: Option<RecordId>, revision: Option<Revision>, waiter: Option<Waiter>) {
        self.queues[kind.index()].push(target, revision, waiter);
        self.pump(kind);
    }

    fn pump(&mut self, kind: Kind) {
        let queue = &mut self.queues[kind.index()];
        if queue.busy || !queue.is_pending() {
            return;
        }
        queue.busy = true;
        let whole_kind = std::mem::take(&mut queue.whole_kind);
        let ids = std::mem::take(&mut queue.ids);
        let revision = queue.revision.take();
        let waiters = std::mem::take(&mut queue.waiters);

        let issued_at = self.cache.sequence();
        debug!(%kind, whole_kind, ids = ids.len(), ?revision, "reload fetch started");

        let gateway = Arc::clone(&self.gateway);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let fetched = if whole_kind {
                match gateway.list(kind).await {
                    Ok(listing) => {
                        // listings are summaries; every record is read in full
                        let ids: Vec<RecordId> = listing.iter().filter_map(|r| r.id().map(str::to_string)).collect();
                        let details = stream::iter(ids)
                            .map(|id| {
                                let gateway = &gateway;
                                async move {
                                    let result = gateway.get(kind, &id).await;
                                    (id, result)
                                }
                            })
                            .buffered(DETAIL_FETCH_CONCURRENCY)
                            .collect::<Vec<_>>()
                            .await;
                        Fetched::Kind {
                            listing: Ok(listing),
                            details,
                            issued_at,
                        }
                    }
                    Err(err) => Fetched::Kind {
                        listing: Err(err),
                        details: Vec::new(),
                        issued_at,
                    },
                }
            } else {
                let mut results = Vec::with_capacity(ids.len());
                for id in ids {
                    let result = gateway.get(kind, &id).await;
                    results.push((id, result));
                }
                Fetched::Ids(results)
            };
            let _ = done_tx.send(Completion::Reloaded {
                kind,
                revision,
                fetched,
                waiters,
            });
        });
    }

    fn apply_reload(&mut self, kind: Kind, revision: Option<Revision>, fetched: Fetched) -> Result<(), GatewayError> {
        let results = match fetched {
            Fetched::Kind {
                listing,
                details,
                issued_at,
            } => {
                let listing = match listing {
                    Ok(listing) => listing,
                    Err(err) => {
                        self.reload_failed(kind, None, &err);
                        return Err(err);
                    }
                };
                let refetched = self.cache.apply_listing(kind, listing, revision, issued_at);
                let mut details: HashMap<RecordId, GatewayResult<DefinitionRecord>> = details.into_iter().collect();
                refetched
                    .into_iter()
                    .filter_map(|id| details.remove(&id).map(|result| (id, result)))
                    .collect()
            }
            Fetched::Ids(results) => results,
        };

        let mut first_err = None;
        for (id, result) in results {
            let outcome = match result {
                Ok(rec) => FetchOutcome::Found(rec),
                Err(GatewayError::NotFound { .. }) => FetchOutcome::Gone,
                Err(err) => {
                    self.reload_failed(kind, Some(id.as_str()), &err);
                    first_err.get_or_insert(err);
                    continue;
                }
            };
            let merged = self.cache.apply_fetched(kind, &id, outcome, revision);
            debug!(%kind, %id, ?merged, "reload merged");
        }
        first_err.map_or(Ok(()), Err)
    }

    fn reload_failed(&self, kind: Kind, id: Option<&str>, err: &GatewayError) {
        warn!(%kind, id = ?id, error = %err, "reload fetch failed; keeping cached values");
        self.emit(SyncEvent::ReloadFailed {
            kind,
            id: id.map(str::to_string),
            error: err.to_string(),
        });
    }

    fn spawn_save(
        &self,
        kind: Kind,
        key: EntryKey,
        request: SaveRequest,
        resp: oneshot::Sender<Result<EntryKey, RuntimeError>>,
    ) {
        let gateway = Arc::clone(&self.gateway);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = match &request {
                SaveRequest::Create { record } => gateway.create(kind, record).await,
                SaveRequest::Update { id, record } => gateway.update(kind, id, record).await,
            };
            let _ = done_tx.send(Completion::Saved {
                kind,
                key,
                result,
                resp,
            });
        });
    }

    fn spawn_delete(&self, kind: Kind, key: EntryKey, resp: Waiter) {
        let gateway = Arc::clone(&self.gateway);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let id = key.record_id().unwrap_or_default().to_string();
            let result = gateway.delete(kind, &id).await;
            let _ = done_tx.send(Completion::Deleted {
                kind,
                key,
                result,
                resp,
            });
        });
    }

    fn publish(&mut self) {
        for event in self.cache.drain_events() {
            let _ = self.events_tx.send(SyncEvent::Cache(event));
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events_tx.send(event);
    }
}
