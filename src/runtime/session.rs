use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    cache::store::RecordCache,
    channel::handle::{ChannelConfig, NotificationChannel, PushConnector, SseConnector},
    config::{ConfigError, SyncConfig},
    gateway::{RecordGateway, TransportError, http::HttpTransport},
    types::ConnectionState,
};

use super::{
    handle::{RuntimeConfig, RuntimeError, SyncHandle, spawn_sync},
    poll::{Connectivity, spawn_game_state_poll, spawn_health_poll},
};

/// Errors raised while starting a [`Session`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The HTTP client could not be built.
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// One gateway, one push channel, the sync loop, and both pollers, wired
/// together and owned as a unit.
pub struct Session {
    handle: SyncHandle,
    channel: NotificationChannel,
    connectivity: watch::Receiver<Connectivity>,
    game_state: watch::Receiver<Option<Value>>,
    cancel: CancellationToken,
    pollers: Vec<JoinHandle<()>>,
}

impl Session {
    /// Connects to the server described by `config` over HTTP and SSE.
    pub fn start(config: &SyncConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let transport = HttpTransport::new(config)?;
        let gateway = Arc::new(RecordGateway::new(Box::new(transport)));
        let connector = Arc::new(SseConnector::new(config));
        Ok(Self::with_parts(gateway, connector, config))
    }

    /// Wires caller-supplied gateway and connector.
    pub fn with_parts(gateway: Arc<RecordGateway>, connector: Arc<dyn PushConnector>, config: &SyncConfig) -> Self {
        let (channel, channel_rx) = NotificationChannel::spawn_subscribed(connector, ChannelConfig::from(config));
        let handle = spawn_sync(
            RecordCache::new(),
            Arc::clone(&gateway),
            Some(channel_rx),
            RuntimeConfig::from(config),
        );

        let cancel = CancellationToken::new();
        let (connectivity, health_task) =
            spawn_health_poll(Arc::clone(&gateway), config.health_poll_interval(), cancel.child_token());
        let (game_state, game_task) =
            spawn_game_state_poll(gateway, config.game_state_poll_interval(), cancel.child_token());
        info!(base_url = %config.base_url, "sync session started");

        Self {
            handle,
            channel,
            connectivity,
            game_state,
            cancel,
            pollers: vec![health_task, game_task],
        }
    }

    /// Handle to the record cache.
    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    /// Push connection state.
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.channel.state()
    }

    /// Latest health check result.
    pub fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.clone()
    }

    /// Latest live game snapshot.
    pub fn game_state(&self) -> watch::Receiver<Option<Value>> {
        self.game_state.clone()
    }

    /// Stops the pollers, the sync loop, and the push channel.
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        self.cancel.cancel();
        for task in self.pollers {
            let _ = task.await;
        }
        let res = self.handle.shutdown().await;
        self.channel.shutdown().await;
        info!("sync session stopped");
        res
    }
}
