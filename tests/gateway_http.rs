use futures::StreamExt;
use reqwest::Client;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

use defsync::{
    channel::handle::{PushConnector, SseConnector},
    config::SyncConfig,
    gateway::{GatewayError, RecordGateway, http::HttpTransport},
    record::DefinitionRecord,
    types::Kind,
};

fn gateway_for(server: &MockServer) -> RecordGateway {
    let config = SyncConfig {
        base_url: server.uri(),
        ..SyncConfig::default()
    };
    RecordGateway::new(Box::new(HttpTransport::new(&config).expect("transport")))
}

fn record(value: serde_json::Value) -> DefinitionRecord {
    DefinitionRecord::from_value(value).expect("object")
}

#[tokio::test]
async fn list_and_get_decode_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/characters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "char_1", "name": "Knight"},
            {"id": "char_2", "name": "Archer"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/characters/char_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "char_1", "name": "Knight", "stats": {"attack": 10}
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let listed = gateway.list(Kind::Character).await.expect("list");
    let ids: Vec<_> = listed.iter().filter_map(|r| r.id()).collect();
    assert_eq!(ids, vec!["char_1", "char_2"]);

    let one = gateway.get(Kind::Character, "char_1").await.expect("get");
    assert_eq!(one.field("stats"), Some(&json!({"attack": 10})));
}

#[tokio::test]
async fn acknowledged_update_is_read_back() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/characters/char_1"))
        .and(body_partial_json(json!({"id": "char_1", "attack": 20})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "id": "char_1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/characters/char_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "char_1", "attack": 20})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let stored = gateway
        .update(Kind::Character, "char_1", &record(json!({"id": "char_1", "attack": 20})))
        .await
        .expect("update");
    assert_eq!(stored, record(json!({"id": "char_1", "attack": 20})));
}

#[tokio::test]
async fn create_returns_server_assigned_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/stages"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"success": true, "id": "stage_7"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/stages/stage_7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "stage_7", "name": "New", "waves": []})))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let created = gateway
        .create(Kind::Stage, &record(json!({"id": "", "name": "New", "waves": []})))
        .await
        .expect("create");
    assert_eq!(created.id(), Some("stage_7"));
}

#[tokio::test]
async fn status_codes_map_to_error_taxonomy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/skills/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "Skill not found"})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/skills/fireball"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "Validation failed",
            "message": "Invalid skill definition",
            "details": "cooldown must be positive"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/game/state"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"error": "Game state not available"})))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    assert_eq!(
        gateway.get(Kind::Skill, "missing").await,
        Err(GatewayError::NotFound {
            kind: Kind::Skill,
            id: "missing".to_string(),
        })
    );

    match gateway
        .update(Kind::Skill, "fireball", &record(json!({"id": "fireball", "cooldown": -1})))
        .await
    {
        Err(GatewayError::Invalid(msg)) => assert!(msg.contains("cooldown must be positive"), "{msg}"),
        other => panic!("expected Invalid, got {other:?}"),
    }

    assert!(matches!(gateway.game_state().await, Err(GatewayError::Unreachable(_))));
}

#[tokio::test]
async fn delete_and_health() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/ui/hud"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "version": "1.0.0"})))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    gateway.delete(Kind::UiLayout, "hud").await.expect("delete");
    let health = gateway.health().await.expect("health");
    assert_eq!(health.status, "ok");
    assert_eq!(health.version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn refused_connection_is_unreachable() {
    let config = SyncConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        request_timeout_ms: 2_000,
        ..SyncConfig::default()
    };
    let gateway = RecordGateway::new(Box::new(HttpTransport::new(&config).expect("transport")));
    assert!(matches!(
        gateway.list(Kind::Character).await,
        Err(GatewayError::Unreachable(_))
    ));
}

#[tokio::test]
async fn sse_connector_yields_named_frames() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: character_reloaded\n",
        "data: {\"type\":\"character_reloaded\",\"timestamp\":1,\"data\":{\"file\":\"char_1.character.json\",\"reloaded\":true}}\n",
        "\n",
        "event: file_changed\n",
        "data: {\"file\":\"x.json\",\"type\":\"modified\"}\n",
        "\n",
    );
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let connector = SseConnector::with_client(Client::new(), format!("{}/events", server.uri()));
    let stream = connector.connect().await.expect("connect");
    let frames: Vec<_> = stream.collect().await;
    let names: Vec<_> = frames
        .into_iter()
        .map(|f| f.expect("frame").event)
        .collect();
    assert_eq!(names, vec!["character_reloaded", "file_changed"]);
}

#[tokio::test]
async fn sse_connector_rejects_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let connector = SseConnector::with_client(Client::new(), format!("{}/events", server.uri()));
    assert!(connector.connect().await.is_err());
}
