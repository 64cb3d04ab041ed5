//! Client configuration: defaults, TOML loading, environment overrides.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for the reconnect delay, in milliseconds.
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;

/// Errors raised while loading or validating [`SyncConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

/// Connection and polling settings shared by the gateway, channel, and pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server base URL.
    pub base_url: String,
    /// Path of the server-sent event stream.
    pub events_path: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Per-request timeout for REST calls.
    pub request_timeout_ms: u64,
    /// Interval of the `/health` check.
    pub health_poll_interval_ms: u64,
    /// Interval of the `/api/game/state` preview poll.
    pub game_state_poll_interval_ms: u64,
    /// Capacity of broadcast event buffers.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            events_path: "/events".to_string(),
            reconnect_delay_ms: 3_000,
            request_timeout_ms: 10_000,
            health_poll_interval_ms: 5_000,
            game_state_poll_interval_ms: 1_000,
            event_buffer: 1024,
        }
    }
}

impl SyncConfig {
    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: SyncConfig = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Applies `DEFSYNC_BASE_URL` and `DEFSYNC_RECONNECT_DELAY_MS` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = lookup("DEFSYNC_BASE_URL") {
            self.base_url = url;
        }
        if let Some(raw) = lookup("DEFSYNC_RECONNECT_DELAY_MS") {
            self.reconnect_delay_ms = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "reconnect_delay_ms",
                reason: format!("not an integer: {raw:?}"),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks ranges; the reconnect delay must be non-zero and bounded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.events_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "events_path",
                reason: "must start with '/'".to_string(),
            });
        }
        if self.reconnect_delay_ms == 0 || self.reconnect_delay_ms > MAX_RECONNECT_DELAY_MS {
            return Err(ConfigError::Invalid {
                field: "reconnect_delay_ms",
                reason: format!("must be within 1..={MAX_RECONNECT_DELAY_MS}"),
            });
        }
        for (field, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("health_poll_interval_ms", self.health_poll_interval_ms),
            ("game_state_poll_interval_ms", self.game_state_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be non-zero".to_string(),
                });
            }
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "event_buffer",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Health check interval as a [`Duration`].
    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    /// Game-state poll interval as a [`Duration`].
    pub fn game_state_poll_interval(&self) -> Duration {
        Duration::from_millis(self.game_state_poll_interval_ms)
    }

    /// Full URL of the event stream.
    pub fn events_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.events_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = SyncConfig::from_toml_str("base_url = \"http://game:9000/\"").unwrap();
        assert_eq!(cfg.base_url, "http://game:9000/");
        assert_eq!(cfg.reconnect_delay_ms, 3_000);
        assert_eq!(cfg.events_url(), "http://game:9000/events");
    }

    #[test]
    fn zero_reconnect_delay_is_rejected() {
        let err = SyncConfig::from_toml_str("reconnect_delay_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "reconnect_delay_ms", .. }));
    }

    #[test]
    fn overrides_apply_and_validate() {
        let cfg = SyncConfig::default()
            .with_overrides(|key| match key {
                "DEFSYNC_RECONNECT_DELAY_MS" => Some("500".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(cfg.reconnect_delay_ms, 500);

        let err = SyncConfig::default()
            .with_overrides(|key| (key == "DEFSYNC_RECONNECT_DELAY_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
