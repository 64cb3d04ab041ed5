//! Typed CRUD façade over an opaque request transport.

/// reqwest-backed [`Transport`].
pub mod http;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{
    record::DefinitionRecord,
    types::{Kind, RecordId},
};

/// HTTP method subset used by the REST surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Lists or reads records.
    Get,
    /// Creates a record.
    Post,
    /// Replaces a stored record.
    Put,
    /// Deletes a record.
    Delete,
}

/// One request issued through a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the server base URL, already escaped.
    pub path: String,
    /// JSON body, if any.
    pub body: Option<Value>,
}

/// Raw response returned by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code; 2xx counts as success.
    pub status: u16,
    /// Response body bytes.
    pub body: Vec<u8>,
}

/// Transport-level failure: connection refused, reset, or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Issues single requests. Implementations never retry.
pub trait Transport: Send + Sync {
    /// Sends `request` and resolves to the raw response.
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>>;
}

/// Gateway failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Unknown id (HTTP 404).
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of the missing record.
        kind: Kind,
        /// Id that was looked up.
        id: RecordId,
    },
    /// Payload rejected by server validation, or an undecodable response.
    #[error("invalid payload: {0}")]
    Invalid(String),
    /// Server could not be reached or could not serve the request.
    #[error("server unreachable: {0}")]
    Unreachable(String),
}

impl From<TransportError> for GatewayError {
    fn from(value: TransportError) -> Self {
        Self::Unreachable(value.0)
    }
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Server-reported status string (`ok`).
    pub status: String,
    /// API version, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// CRUD gateway for every [`Kind`], generic over the transport.
pub struct RecordGateway {
    transport: Box<dyn Transport>,
}

impl RecordGateway {
    /// Wraps a transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// `GET /health`.
    pub async fn health(&self) -> GatewayResult<HealthStatus> {
        let body = self.request(Method::Get, "/health".to_string(), None, None).await?;
        decode(body)
    }

    /// `GET /api/game/state`: read-only live snapshot for preview.
    pub async fn game_state(&self) -> GatewayResult<Value> {
        self.request(Method::Get, "/api/game/state".to_string(), None, None).await
    }

    /// Lists every record of `kind`.
    pub async fn list(&self, kind: Kind) -> GatewayResult<Vec<DefinitionRecord>> {
        let body = self
            .request(Method::Get, kind.collection_path().to_string(), None, None)
            .await?;
        decode(body)
    }

    /// Fetches one record.
    pub async fn get(&self, kind: Kind, id: &str) -> GatewayResult<DefinitionRecord> {
        let body = self
            .request(Method::Get, item_path(kind, id), None, Some((kind, id)))
            .await?;
        decode(body)
    }

    /// Creates a record; the server assigns or validates its id.
    pub async fn create(&self, kind: Kind, record: &DefinitionRecord) -> GatewayResult<DefinitionRecord> {
        let payload = serde_json::to_value(record).map_err(|e| GatewayError::Invalid(e.to_string()))?;
        let body = self
            .request(Method::Post, kind.collection_path().to_string(), Some(payload), None)
            .await?;
        self.resolve_write(kind, record.id(), body).await
    }

    /// Replaces the record stored under `id`.
    pub async fn update(&self, kind: Kind, id: &str, record: &DefinitionRecord) -> GatewayResult<DefinitionRecord> {
        let payload = serde_json::to_value(record).map_err(|e| GatewayError::Invalid(e.to_string()))?;
        let body = self
            .request(Method::Put, item_path(kind, id), Some(payload), Some((kind, id)))
            .await?;
        self.resolve_write(kind, Some(id), body).await
    }

    /// Deletes the record stored under `id`.
    pub async fn delete(&self, kind: Kind, id: &str) -> GatewayResult<()> {
        self.request(Method::Delete, item_path(kind, id), None, Some((kind, id)))
            .await?;
        Ok(())
    }

    /// Turns a write response into the stored record.
    ///
    /// The server answers writes with `{"success": true, "id": ...}`; in that
    /// case the stored record is read back.
    async fn resolve_write(
        &self,
        kind: Kind,
        fallback_id: Option<&str>,
        body: Value,
    ) -> GatewayResult<DefinitionRecord> {
        if let Some(id) = ack_id(&body).or(fallback_id.filter(|_| is_ack(&body))) {
            let id = id.to_string();
            debug!(%kind, %id, "write acknowledged; reading back stored record");
            return self.get(kind, &id).await;
        }
        decode(body)
    }

    async fn request(
        &self,
        method: Method,
        path: String,
        body: Option<Value>,
        target: Option<(Kind, &str)>,
    ) -> GatewayResult<Value> {
        let resp = self.transport.execute(ApiRequest { method, path, body }).await?;
        match resp.status {
            200..=299 => {
                if resp.body.is_empty() {
                    return Ok(Value::Null);
                }
                serde_json::from_slice(&resp.body)
                    .map_err(|e| GatewayError::Invalid(format!("undecodable response: {e}")))
            }
            404 => match target {
                Some((kind, id)) => Err(GatewayError::NotFound {
                    kind,
                    id: id.to_string(),
                }),
                None => Err(GatewayError::Invalid(error_message(&resp))),
            },
            400..=499 => Err(GatewayError::Invalid(error_message(&resp))),
            _ => Err(GatewayError::Unreachable(error_message(&resp))),
        }
    }
}

fn item_path(kind: Kind, id: &str) -> String {
    format!("{}/{}", kind.collection_path(), urlencoding::encode(id))
}

fn decode<T: serde::de::DeserializeOwned>(body: Value) -> GatewayResult<T> {
    serde_json::from_value(body).map_err(|e| GatewayError::Invalid(format!("unexpected response shape: {e}")))
}

/// True for `{"success": ..., "id"?: ..., "backup"?: ...}` bodies.
fn is_ack(body: &Value) -> bool {
    body.as_object().is_some_and(|map| {
        map.contains_key("success")
            && map
                .keys()
                .all(|k| matches!(k.as_str(), "success" | "id" | "backup"))
    })
}

fn ack_id(body: &Value) -> Option<&str> {
    if !is_ack(body) {
        return None;
    }
    body.get("id").and_then(Value::as_str).filter(|id| !id.is_empty())
}

/// Best-effort human message from an error body.
fn error_message(resp: &ApiResponse) -> String {
    let parsed: Option<Value> = serde_json::from_slice(&resp.body).ok();
    let detail = parsed.as_ref().and_then(|v| {
        ["details", "message", "error"]
            .iter()
            .filter_map(|k| v.get(*k).and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .map(str::to_string)
    });
    match detail {
        Some(msg) => format!("HTTP {}: {msg}", resp.status),
        None => format!("HTTP {}", resp.status),
    }
}
