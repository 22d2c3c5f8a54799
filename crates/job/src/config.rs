//! Client configuration.
//!
//! Stored as TOML. Every field has a default, so an empty file (or no file
//! at all) gives a working configuration for a service on `localhost:5000`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use csvflow_event_channel::{CommandKind, ReconnectConfig};
use csvflow_protocol::constants::{
    DEFAULT_RESULT_NAME, TRANSFER_INACTIVITY_TIMEOUT, TRANSFER_RESPONSE_TIMEOUT,
    UPLOAD_CHUNK_SIZE,
};
use csvflow_transfer::TransferMode;

/// Errors from loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which wire protocol the service speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// `POST /process-csv`; the response body is the result.
    RequestResponse,
    /// `POST /upload-csv`, then push events over the event channel.
    #[default]
    TwoPhase,
    /// The file itself travels in an `upload_file` command; no HTTP.
    EventsOnly,
}

/// HTTP transfer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub mode: TransferMode,
    pub chunk_size: usize,
    pub inactivity_timeout_secs: u64,
    /// Wait for the response after the body reached 100%.
    pub response_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::default(),
            chunk_size: UPLOAD_CHUNK_SIZE,
            inactivity_timeout_secs: TRANSFER_INACTIVITY_TIMEOUT.as_secs(),
            response_timeout_secs: TRANSFER_RESPONSE_TIMEOUT.as_secs(),
        }
    }
}

/// Reconnection settings of the event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_attempts: defaults.max_attempts,
        }
    }
}

/// Event channel settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Start command sent in the two-phase variant.
    pub command: CommandKind,
    /// Re-send the file bytes with the start command.
    pub resend_file: bool,
    pub reconnect: ReconnectSettings,
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the HTTP endpoints.
    pub base_url: String,
    /// URL of the event channel.
    pub events_url: String,
    pub variant: ProtocolVariant,
    pub transfer: TransferConfig,
    pub events: EventsConfig,
    /// Return to `Idle` right after a job ends instead of waiting for the
    /// caller to acknowledge it.
    pub auto_reset: bool,
    /// Result name used when the service gives none.
    pub default_result_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            events_url: "ws://localhost:5000/events".into(),
            variant: ProtocolVariant::default(),
            transfer: TransferConfig::default(),
            events: EventsConfig::default(),
            auto_reset: false,
            default_result_name: DEFAULT_RESULT_NAME.into(),
        }
    }
}

impl ClientConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path`, or the defaults if it does not
    /// exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), variant = ?config.variant, "configuration loaded");
        Ok(config)
    }

    /// Checks values serde cannot: URL schemes and numeric ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.variant != ProtocolVariant::EventsOnly
            && !has_scheme(&self.base_url, &["http://", "https://"])
        {
            return Err(ConfigError::Invalid(format!(
                "base_url must be http(s): {}",
                self.base_url
            )));
        }
        if self.variant != ProtocolVariant::RequestResponse
            && !has_scheme(&self.events_url, &["ws://", "wss://"])
        {
            return Err(ConfigError::Invalid(format!(
                "events_url must be ws(s): {}",
                self.events_url
            )));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid("transfer.chunk_size must be > 0".into()));
        }
        if self.transfer.inactivity_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "transfer.inactivity_timeout_secs must be > 0".into(),
            ));
        }
        if self.transfer.response_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "transfer.response_timeout_secs must be > 0".into(),
            ));
        }
        let reconnect = &self.events.reconnect;
        if reconnect.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "events.reconnect.max_attempts must be >= 1".into(),
            ));
        }
        if reconnect.backoff_factor.is_nan() || reconnect.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "events.reconnect.backoff_factor must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer.inactivity_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer.response_timeout_secs)
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        let r = &self.events.reconnect;
        ReconnectConfig {
            initial_delay: Duration::from_millis(r.initial_delay_ms),
            max_delay: Duration::from_millis(r.max_delay_ms),
            backoff_factor: r.backoff_factor,
            max_attempts: r.max_attempts,
        }
    }
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    schemes.iter().any(|s| url.starts_with(s))
}
