use std::{sync::Arc, time::Duration};

use eventsource_stream::Eventsource;
use futures::{
    StreamExt,
    future::BoxFuture,
    stream::BoxStream,
};
use reqwest::{Client, header};
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::SyncConfig,
    types::{ConnectionState, Kind, Revision},
};

use super::events::{ChannelEvent, RawEvent, ReloadEvent, ServerEvent, decode_server_event};

/// Push connection failures. All of them are recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Opening the stream failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// An open stream errored.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Stream of raw SSE frames from one open connection.
pub type RawEventStream = BoxStream<'static, Result<RawEvent, ChannelError>>;

/// Opens push connections. One call per connection attempt.
pub trait PushConnector: Send + Sync + 'static {
    /// Opens a new connection and returns its frame stream.
    fn connect(&self) -> BoxFuture<'_, Result<RawEventStream, ChannelError>>;
}

/// Reconnect policy of a [`NotificationChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Broadcast capacity for subscribers.
    pub event_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            event_buffer: 1024,
        }
    }
}

impl From<&SyncConfig> for ChannelConfig {
    fn from(value: &SyncConfig) -> Self {
        Self {
            reconnect_delay: value.reconnect_delay(),
            event_buffer: value.event_buffer,
        }
    }
}

/// Owner of the push connection.
///
/// Spawning starts the connect loop immediately. Reconnects repeat forever
/// with a fixed delay; only [`NotificationChannel::shutdown`] stops them.
pub struct NotificationChannel {
    events_tx: broadcast::Sender<ChannelEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NotificationChannel {
    /// Spawns the connection task on the current tokio runtime.
    pub fn spawn(connector: Arc<dyn PushConnector>, config: ChannelConfig) -> Self {
        Self::spawn_subscribed(connector, config).0
    }

    /// Like [`Self::spawn`], also returning a receiver that exists before the
    /// task starts and therefore sees every event, the first `Connecting` included.
    pub fn spawn_subscribed(
        connector: Arc<dyn PushConnector>,
        config: ChannelConfig,
    ) -> (Self, broadcast::Receiver<ChannelEvent>) {
        let (events_tx, events_rx) = broadcast::channel(config.event_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let worker = Worker {
            connector,
            delay: config.reconnect_delay.max(Duration::from_millis(1)),
            events_tx: events_tx.clone(),
            state_tx,
            cancel: cancel.clone(),
            revisions: [0; Kind::COUNT],
        };
        let task = tokio::spawn(worker.run());

        let channel = Self {
            events_tx,
            state_rx,
            cancel,
            task: Some(task),
        };
        (channel, events_rx)
    }

    /// Subscribes to state changes and reload events, in arrival order.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }

    /// Current connection state signal.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Closes the connection, cancels any pending reconnect, and waits for
    /// the task to finish in `Disconnected`.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    connector: Arc<dyn PushConnector>,
    delay: Duration,
    events_tx: broadcast::Sender<ChannelEvent>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    revisions: [Revision; Kind::COUNT],
}

impl Worker {
    async fn run(mut self) {
        let mut attempt: u64 = 0;
        loop {
            self.transition(ConnectionState::Connecting);
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.connector.connect() => res,
            };

            match opened {
                Ok(stream) => {
                    attempt = 0;
                    self.transition(ConnectionState::Connected);
                    if self.pump(stream).await {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "push connection failed to open"),
            }

            attempt += 1;
            self.transition(ConnectionState::Reconnecting);
            debug!(attempt, delay_ms = self.delay.as_millis() as u64, "reconnect scheduled");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        self.transition(ConnectionState::Disconnected);
        info!("push channel shut down");
    }

    /// Forwards frames until the stream ends or errors. Returns true on shutdown.
    async fn pump(&mut self, mut stream: RawEventStream) -> bool {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return true,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(raw)) => self.dispatch(&raw),
                Some(Err(err)) => {
                    warn!(error = %err, "push stream errored");
                    return false;
                }
                None => {
                    warn!("push stream closed by server");
                    return false;
                }
            }
        }
    }

    fn dispatch(&mut self, raw: &RawEvent) {
        let Some(decoded) = decode_server_event(raw) else {
            debug!(event = %raw.event, "ignoring unknown push event");
            return;
        };
        let event = match decoded {
            ServerEvent::FileChanged { file } => {
                debug!(file = ?file, "file changed; full resync requested");
                ChannelEvent::ResyncAll
            }
            ServerEvent::KindChanged { kind, affected_id } => {
                let slot = &mut self.revisions[kind.index()];
                *slot += 1;
                debug!(%kind, id = ?affected_id, revision = *slot, "reload event");
                ChannelEvent::Reload(ReloadEvent {
                    kind,
                    affected_id,
                    revision: *slot,
                })
            }
        };
        let _ = self.events_tx.send(event);
    }

    fn transition(&self, next: ConnectionState) {
        let prev = *self.state_tx.borrow();
        if prev == next {
            return;
        }
        self.state_tx.send_replace(next);
        debug!(from = ?prev, to = ?next, "connection state");
        let _ = self.events_tx.send(ChannelEvent::State(next));
    }
}

/// Server-sent-events connector over reqwest.
#[derive(Debug, Clone)]
pub struct SseConnector {
    client: Client,
    url: String,
}

impl SseConnector {
    /// Connector for `config.events_url()`.
    ///
    /// The client carries no overall timeout; the stream is long-lived.
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_client(Client::new(), config.events_url())
    }

    /// Connector using an existing client.
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    async fn open(&self) -> Result<RawEventStream, ChannelError> {
        let resp = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?
            .error_for_status()
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        let stream = resp
            .bytes_stream()
            .eventsource()
            .map(|item| match item {
                Ok(ev) => Ok(RawEvent {
                    event: ev.event,
                    data: ev.data,
                }),
                Err(e) => Err(ChannelError::Stream(e.to_string())),
            });
        Ok(stream.boxed())
    }
}

impl PushConnector for SseConnector {
    fn connect(&self) -> BoxFuture<'_, Result<RawEventStream, ChannelError>> {
        Box::pin(self.open())
    }
}
