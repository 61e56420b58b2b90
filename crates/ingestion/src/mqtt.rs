//! MQTT Transport
//!
//! `rumqttc` client with a QoS 0 subscription. The event loop runs in its own
//! task and awaits the consumer for every publish before polling again, so
//! readings are handled strictly in delivery order.

use crate::config::{BrokerAddress, IngestionConfig, MqttSettings};
use crate::consumer::IngestionConsumer;
use crate::error::ConfigError;
use crate::transport::{Subscription, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the client request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Back-off after a connection error before rumqttc reconnects
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Production transport backed by an MQTT broker
pub struct MqttTransport {
    settings: MqttSettings,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }

    fn options(&self, address: &BrokerAddress) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            address.host.clone(),
            address.port,
        );
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        options
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn subscribe(
        &self,
        config: &IngestionConfig,
        consumer: Arc<IngestionConsumer>,
    ) -> Result<Box<dyn Subscription>, ConfigError> {
        let address = config.validate()?;
        let (client, mut eventloop) =
            AsyncClient::new(self.options(&address), REQUEST_CHANNEL_CAPACITY);

        client
            .subscribe(config.topic.as_str(), QoS::AtMostOnce)
            .await
            .map_err(|e| ConfigError::Subscribe(e.to_string()))?;

        let timeout = self.settings.connect_timeout;
        match tokio::time::timeout(timeout, handshake(&mut eventloop, &config.topic, &consumer)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ConfigError::Timeout(timeout)),
        }

        info!(broker = %address, topic = %config.topic, "Subscribed to MQTT topic");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            config.topic.clone(),
            consumer,
            cancel.clone(),
        ));

        Ok(Box::new(MqttSubscription { client, cancel, task }))
    }
}

/// Drive the event loop until CONNACK and a successful SUBACK arrive
async fn handshake(
    eventloop: &mut EventLoop,
    topic: &str,
    consumer: &IngestionConsumer,
) -> Result<(), ConfigError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("MQTT connack: {:?}", ack.code);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err(ConfigError::Subscribe(format!(
                        "broker refused subscription to '{topic}'"
                    )));
                }
                return Ok(());
            }
            // Retained messages may arrive before the SUBACK.
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                consumer.process(&publish.topic, &publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => return Err(ConfigError::Connection(e.to_string())),
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    consumer: Arc<IngestionConsumer>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                consumer.process(&publish.topic, &publish.payload).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Clean sessions drop subscriptions on reconnect.
                info!(topic = %topic, "Reconnected to MQTT broker, resubscribing");
                if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                    error!("MQTT resubscribe failed: {}", e);
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(incoming) => {
                debug!("MQTT event: {:?}", incoming);
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
    info!(topic = %topic, "MQTT event loop stopped");
}

struct MqttSubscription {
    client: AsyncClient,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[async_trait]
impl Subscription for MqttSubscription {
    async fn shutdown(mut self: Box<Self>, grace: Duration) {
        if let Err(e) = self.client.try_disconnect() {
            warn!("MQTT disconnect request failed: {}", e);
        }

        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            debug!("MQTT disconnect grace period elapsed, cancelling event loop");
            self.cancel.cancel();
            if let Err(e) = (&mut self.task).await {
                error!("MQTT event loop task failed: {}", e);
            }
        }
    }
}
