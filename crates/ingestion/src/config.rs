//! Ingestion Configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default MQTT port when the broker address has none
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Broker/topic pair requested by an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Broker address, e.g. `tcp://localhost:1883`
    pub broker: String,
    /// Topic carrying sensor readings
    pub topic: String,
}

impl IngestionConfig {
    pub fn new(broker: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            topic: topic.into(),
        }
    }

    /// Check the pair before any connection is attempted
    pub fn validate(&self) -> Result<BrokerAddress, ConfigError> {
        let topic = self.topic.trim();
        if topic.is_empty() {
            return Err(ConfigError::InvalidTopic("topic is empty".to_string()));
        }
        BrokerAddress::parse(&self.broker)
    }
}

/// The configuration currently in effect.
///
/// `version` increases by one on every successful reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveConfig {
    pub version: u64,
    pub broker: String,
    pub topic: String,
}

/// Parsed `[scheme://]host[:port]` broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parse a broker address. Accepted schemes: `tcp`, `mqtt`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let rest = match raw.split_once("://") {
            Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
                "tcp" | "mqtt" => rest,
                other => {
                    return Err(ConfigError::InvalidBroker(format!(
                        "unsupported scheme '{other}'"
                    )))
                }
            },
            None => raw,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConfigError::InvalidBroker(format!("invalid port in '{raw}'"))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_MQTT_PORT),
        };

        if host.is_empty() {
            return Err(ConfigError::InvalidBroker(format!("missing host in '{raw}'")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection parameters that stay fixed across reconfigurations
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// MQTT client id
    pub client_id: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Time allowed for CONNACK + SUBACK
    pub connect_timeout: Duration,
    /// Time allowed to flush DISCONNECT before the loop is cancelled
    pub disconnect_grace: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            client_id: "sensor-hub-ingest".to_string(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            disconnect_grace: Duration::from_millis(250),
        }
    }
}
