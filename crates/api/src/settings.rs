//! Layered Configuration
//!
//! Defaults, then an optional TOML file, then `SENSOR_HUB__*` environment
//! variables (e.g. `SENSOR_HUB__SERVER__BIND_ADDR=127.0.0.1:9090`).

use config::{Config, ConfigBuilder, Environment, File};
use ingestion::{IngestionConfig, MqttSettings};
use live_tail::LiveTailConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, overridable with `SENSOR_HUB_CONFIG`
pub const DEFAULT_CONFIG_FILE: &str = "sensor-hub.toml";

/// Errors while loading settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub live_tail: LiveTailSection,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// MQTT settings. `broker` and `topic` together form the startup subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttSection {
    #[serde(default)]
    pub broker: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker: None,
            topic: None,
            client_id: default_client_id(),
            connect_timeout_secs: default_connect_timeout_secs(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl MqttSection {
    /// Subscription to open at startup, if both halves are configured
    pub fn initial(&self) -> Option<IngestionConfig> {
        match (&self.broker, &self.topic) {
            (Some(broker), Some(topic)) => Some(IngestionConfig::new(broker, topic)),
            _ => None,
        }
    }

    pub fn to_mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            client_id: self.client_id.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            disconnect_grace: self.disconnect_grace(),
        }
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveTailSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for LiveTailSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl LiveTailSection {
    pub fn to_config(&self) -> LiveTailConfig {
        LiveTailConfig {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            batch_size: self.batch_size.max(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_database_url() -> String {
    "sqlite://sensor-hub.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_client_id() -> String {
    MqttSettings::default().client_id
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_disconnect_grace_ms() -> u64 {
    250
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load from `SENSOR_HUB_CONFIG` (or `sensor-hub.toml`) plus environment
    pub fn load() -> Result<Self, SettingsError> {
        let path =
            std::env::var("SENSOR_HUB_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load from a specific file (missing file is allowed) plus environment
    pub fn load_from(path: &str) -> Result<Self, SettingsError> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("SENSOR_HUB")
                    .separator("__")
                    .try_parsing(true),
            );
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self, SettingsError> {
        Ok(builder.build()?.try_deserialize()?)
    }
}
