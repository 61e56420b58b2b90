//! Subscription Transport Abstraction

use crate::config::IngestionConfig;
use crate::consumer::IngestionConsumer;
use crate::error::ConfigError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Opens subscriptions that feed a consumer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and subscribe.
    ///
    /// Returns only once the subscription is established; every message
    /// delivered afterwards is passed to `consumer`, one at a time.
    async fn subscribe(
        &self,
        config: &IngestionConfig,
        consumer: Arc<IngestionConsumer>,
    ) -> Result<Box<dyn Subscription>, ConfigError>;
}

/// A live subscription
#[async_trait]
pub trait Subscription: Send {
    /// Disconnect, waiting up to `grace` for a clean close.
    ///
    /// A message already being processed is always allowed to finish.
    async fn shutdown(self: Box<Self>, grace: Duration);
}
