use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use strata_topics::SessionError;

pub const ANONYMOUS_PRINCIPAL: &str = "ANONYMOUS";
pub const MIN_MESSAGE_SIZE: u32 = 1024;
pub const DEFAULT_MAXIMUM_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;
const MAX_RECONNECTION_DELAY_MS: u64 = 3_600_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self { enabled: true, max_attempts: 5, delay_ms: 1_000 }
    }
}

impl ReconnectionConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub principal: String,
    pub properties: BTreeMap<String, String>,
    pub maximum_message_size: u32,
    pub reconnection: ReconnectionConfig,
    /// Pending notifications on one stream above which a warning is logged.
    pub stream_queue_warn_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            principal: ANONYMOUS_PRINCIPAL.to_owned(),
            properties: BTreeMap::new(),
            maximum_message_size: DEFAULT_MAXIMUM_MESSAGE_SIZE,
            reconnection: ReconnectionConfig::default(),
            stream_queue_warn_depth: 1_000,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, SessionError> {
        let config: Self =
            toml::from_str(raw).map_err(|err| SessionError::invalid_argument("config", err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SessionError::invalid_argument("config", format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.principal.trim().is_empty() {
            return Err(SessionError::invalid_argument("principal", "principal must not be empty"));
        }
        if self.maximum_message_size < MIN_MESSAGE_SIZE {
            return Err(SessionError::invalid_argument(
                "maximum_message_size",
                format!("maximum_message_size must be at least {MIN_MESSAGE_SIZE}"),
            ));
        }
        if self.reconnection.enabled && self.reconnection.max_attempts == 0 {
            return Err(SessionError::invalid_argument(
                "reconnection.max_attempts",
                "max_attempts must be greater than zero when reconnection is enabled",
            ));
        }
        if self.reconnection.delay_ms > MAX_RECONNECTION_DELAY_MS {
            return Err(SessionError::invalid_argument(
                "reconnection.delay_ms",
                format!("delay_ms must not exceed {MAX_RECONNECTION_DELAY_MS}"),
            ));
        }
        if let Some(key) = self.properties.keys().find(|key| key.starts_with('$')) {
            return Err(SessionError::invalid_argument(
                "properties",
                format!("property {key} is reserved for derived session properties"),
            ));
        }
        if self.stream_queue_warn_depth == 0 {
            return Err(SessionError::invalid_argument(
                "stream_queue_warn_depth",
                "stream_queue_warn_depth must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_reconnection(mut self, reconnection: ReconnectionConfig) -> Self {
        self.reconnection = reconnection;
        self
    }
}
