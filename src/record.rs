//! Definition records and the typed stage/wave view.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::RecordId;

/// Opaque definition record as exchanged with the server.
///
/// Only `id` and, for stages, `waves` carry meaning to the synchronization
/// core. Everything else round-trips untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionRecord(Map<String, Value>);

impl DefinitionRecord {
    /// Creates an empty record (no id, so it counts as new).
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Creates a record with only an id set.
    pub fn with_id(id: impl Into<RecordId>) -> Self {
        let mut rec = Self::new();
        rec.set_id(id);
        rec
    }

    /// Non-empty server id, if any.
    pub fn id(&self) -> Option<&str> {
        self.0
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// True when the record has no server identity yet.
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    /// Sets the record id.
    pub fn set_id(&mut self, id: impl Into<RecordId>) {
        self.0.insert("id".to_string(), Value::String(id.into()));
    }

    /// Clears the id so the record counts as new.
    pub fn clear_id(&mut self) {
        self.0.insert("id".to_string(), Value::String(String::new()));
    }

    /// Reads a top-level field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Writes a top-level field.
    pub fn set_field(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Writes `value` under `section.key`, creating the section object if needed.
    pub fn set_nested(&mut self, section: &str, key: &str, value: impl Into<Value>) {
        let slot = self
            .0
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(map) = slot {
            map.insert(key.to_string(), value.into());
        }
    }

    /// Borrowed view of the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Converts into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Decodes the ordered `waves` list of a stage record.
    ///
    /// A record without `waves` yields an empty list.
    pub fn waves(&self) -> Result<StageWaves, serde_json::Error> {
        match self.0.get("waves") {
            Some(v) => serde_json::from_value(v.clone()),
            None => Ok(StageWaves::default()),
        }
    }

    /// Replaces the `waves` list of a stage record.
    pub fn set_waves(&mut self, waves: &StageWaves) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(waves)?;
        self.0.insert("waves".to_string(), value);
        Ok(())
    }
}

impl From<Map<String, Value>> for DefinitionRecord {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

/// One enemy spawn line inside a wave.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnemySpawnEntry {
    /// Character definition to spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    /// Number of spawns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    /// Delay from wave start, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
    /// Interval between spawns, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
    /// Spawn lane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<i64>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One wave of a stage, in execution order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveDef {
    /// Editor-facing wave id, when the file carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// 1-based position as read by the game.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_number: Option<i64>,
    /// Enemy spawn lines.
    #[serde(default)]
    pub enemies: Vec<EnemySpawnEntry>,
    /// Maximum wave duration, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Condition that starts the next wave (`time`, `all_dead`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_condition: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WaveDef {
    /// Total enemies spawned by this wave.
    pub fn enemy_count(&self) -> usize {
        self.enemies
            .iter()
            .map(|e| e.count.unwrap_or(1).max(0) as usize)
            .sum()
    }
}

/// Ordered wave list of a stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageWaves(pub Vec<WaveDef>);

impl StageWaves {
    /// Returns a copy with `waveNumber` rewritten to 1-based list order.
    pub fn renumbered(&self) -> Self {
        Self(
            self.0
                .iter()
                .enumerate()
                .map(|(idx, w)| WaveDef {
                    wave_number: Some(idx as i64 + 1),
                    ..w.clone()
                })
                .collect(),
        )
    }

    /// Borrowed wave slice.
    pub fn as_slice(&self) -> &[WaveDef] {
        &self.0
    }
}

impl From<Vec<WaveDef>> for StageWaves {
    fn from(value: Vec<WaveDef>) -> Self {
        Self(value)
    }
}
