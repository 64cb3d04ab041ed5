use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::gateway::{HealthStatus, RecordGateway};

/// Outcome of the latest `/health` check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    /// No health check has completed yet.
    Unknown,
    /// The server answered with its health report.
    Online(HealthStatus),
    /// The last health check got no answer.
    Offline,
}

/// Polls `/health` every `every` until `cancel` fires.
pub fn spawn_health_poll(
    gateway: Arc<RecordGateway>,
    every: Duration,
    cancel: CancellationToken,
) -> (watch::Receiver<Connectivity>, JoinHandle<()>) {
    spawn_poll(Connectivity::Unknown, every, cancel, move || {
        let gateway = Arc::clone(&gateway);
        Box::pin(async move {
            match gateway.health().await {
                Ok(status) => Connectivity::Online(status),
                Err(err) => {
                    debug!(error = %err, "health check failed");
                    Connectivity::Offline
                }
            }
        })
    })
}

/// Polls the live game snapshot every `every` until `cancel` fires.
///
/// The value is `None` while the game is not running or the server is away.
pub fn spawn_game_state_poll(
    gateway: Arc<RecordGateway>,
    every: Duration,
    cancel: CancellationToken,
) -> (watch::Receiver<Option<Value>>, JoinHandle<()>) {
    spawn_poll(None, every, cancel, move || {
        let gateway = Arc::clone(&gateway);
        Box::pin(async move {
            match gateway.game_state().await {
                Ok(state) => Some(state),
                Err(err) => {
                    debug!(error = %err, "game state unavailable");
                    None
                }
            }
        })
    })
}

fn spawn_poll<T, F>(initial: T, every: Duration, cancel: CancellationToken, mut check: F) -> (watch::Receiver<T>, JoinHandle<()>)
where
    T: PartialEq + Send + Sync + 'static,
    F: FnMut() -> BoxFuture<'static, T> + Send + 'static,
{
    let (tx, rx) = watch::channel(initial);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let value = tokio::select! {
                _ = cancel.cancelled() => break,
                value = check() => value,
            };
            tx.send_if_modified(|current| {
                if *current == value {
                    false
                } else {
                    *current = value;
                    true
                }
            });
        }
    });
    (rx, task)
}
