//! Configuration Controller
//!
//! Single owner of the active broker/topic pair. Reconfiguration requests
//! are serialized behind one async mutex, so at most one subscription exists
//! at any time.

use crate::config::{ActiveConfig, IngestionConfig};
use crate::consumer::IngestionConsumer;
use crate::error::ConfigError;
use crate::transport::{Subscription, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

struct ControllerState {
    active: Option<(ActiveConfig, Box<dyn Subscription>)>,
    version: u64,
}

/// Owns the ingestion subscription and swaps it on request
pub struct IngestionController {
    transport: Arc<dyn Transport>,
    consumer: Arc<IngestionConsumer>,
    disconnect_grace: Duration,
    state: Mutex<ControllerState>,
}

impl IngestionController {
    pub fn new(
        transport: Arc<dyn Transport>,
        consumer: Arc<IngestionConsumer>,
        disconnect_grace: Duration,
    ) -> Self {
        Self {
            transport,
            consumer,
            disconnect_grace,
            state: Mutex::new(ControllerState {
                active: None,
                version: 0,
            }),
        }
    }

    /// Replace the active subscription.
    ///
    /// The current subscription is torn down before the new one is opened.
    /// On failure nothing is left running; the old configuration is not
    /// restored.
    pub async fn reconfigure(&self, config: IngestionConfig) -> Result<ActiveConfig, ConfigError> {
        let mut state = self.state.lock().await;

        if let Some((previous, subscription)) = state.active.take() {
            info!(
                version = previous.version,
                broker = %previous.broker,
                topic = %previous.topic,
                "Tearing down ingestion subscription"
            );
            subscription.shutdown(self.disconnect_grace).await;
        }

        let subscription = match self
            .transport
            .subscribe(&config, Arc::clone(&self.consumer))
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                metrics::counter!("ingest_reconfigurations_total", "result" => "error").increment(1);
                error!(broker = %config.broker, topic = %config.topic, error = %e, "Reconfiguration failed");
                return Err(e);
            }
        };

        state.version += 1;
        let active = ActiveConfig {
            version: state.version,
            broker: config.broker,
            topic: config.topic,
        };
        state.active = Some((active.clone(), subscription));

        metrics::counter!("ingest_reconfigurations_total", "result" => "ok").increment(1);
        info!(
            version = active.version,
            broker = %active.broker,
            topic = %active.topic,
            "Ingestion reconfigured"
        );
        Ok(active)
    }

    /// The configuration in effect, if any
    pub async fn current(&self) -> Option<ActiveConfig> {
        let state = self.state.lock().await;
        state.active.as_ref().map(|(config, _)| config.clone())
    }

    /// Close the active subscription, if any
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some((active, subscription)) = state.active.take() {
            info!(topic = %active.topic, "Closing ingestion subscription");
            subscription.shutdown(self.disconnect_grace).await;
        }
    }
}
