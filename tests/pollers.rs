use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use defsync::{
    config::SyncConfig,
    gateway::{RecordGateway, http::HttpTransport},
    runtime::poll::{Connectivity, spawn_game_state_poll, spawn_health_poll},
};

const EVERY: Duration = Duration::from_millis(20);

fn gateway_for(uri: String) -> Arc<RecordGateway> {
    let config = SyncConfig {
        base_url: uri,
        request_timeout_ms: 1_000,
        ..SyncConfig::default()
    };
    Arc::new(RecordGateway::new(Box::new(HttpTransport::new(&config).expect("transport"))))
}

async fn settle<T>(rx: &mut watch::Receiver<T>, want: impl Fn(&T) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| want(v)))
        .await
        .expect("value in time")
        .expect("poller alive");
}

#[tokio::test]
async fn health_poll_tracks_server() {
    let server = MockServer::builder().start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let (mut rx, task) = spawn_health_poll(gateway_for(server.uri()), EVERY, cancel.clone());
    settle(&mut rx, |c| matches!(c, Connectivity::Online(h) if h.status == "ok")).await;

    drop(server);
    settle(&mut rx, |c| *c == Connectivity::Offline).await;

    cancel.cancel();
    task.await.expect("poller exits");
}

#[tokio::test]
async fn game_state_is_none_while_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/game/state"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"error": "Game state not available"})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/game/state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"wave": 3, "running": true})))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let (mut rx, task) = spawn_game_state_poll(gateway_for(server.uri()), EVERY, cancel.clone());
    assert_eq!(*rx.borrow(), None);
    settle(&mut rx, |s| s.as_ref().is_some_and(|v| v["wave"] == 3)).await;

    cancel.cancel();
    task.await.expect("poller exits");
}
