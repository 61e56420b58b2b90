//! Sensor Reading Ingestion
//!
//! Subscribes to an MQTT topic and stores every reading that decodes and
//! references a registered sensor. Delivery is at most once: anything that
//! fails is logged and dropped, never retried.
//!
//! The broker/topic pair is owned by [`IngestionController`], which is the
//! only place a subscription is created or torn down.

mod config;
mod consumer;
mod controller;
mod error;
mod mqtt;
mod transport;

pub use config::{ActiveConfig, BrokerAddress, IngestionConfig, MqttSettings};
pub use consumer::IngestionConsumer;
pub use controller::IngestionController;
pub use error::{ConfigError, IngestError};
pub use mqtt::MqttTransport;
pub use transport::{Subscription, Transport};
