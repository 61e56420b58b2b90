//! Sensor Simulator
//!
//! Publishes random readings for one sensor to an MQTT topic until Ctrl+C.

use anyhow::{ensure, Context};
use chrono::Utc;
use clap::Parser;
use data_validator::Reading;
use ingestion::BrokerAddress;
use rand::Rng;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "sensor-simulator", about = "Publish simulated sensor readings over MQTT")]
struct Args {
    /// ID of the registered sensor
    #[arg(long)]
    sensor_id: String,

    /// Minimum sensor value
    #[arg(long, default_value_t = 2.0)]
    min_value: f64,

    /// Maximum sensor value
    #[arg(long, default_value_t = 100.0)]
    max_value: f64,

    /// MQTT broker address
    #[arg(long, default_value = "tcp://localhost:1883")]
    broker: String,

    /// MQTT topic for sensor data
    #[arg(long, default_value = "sensors")]
    topic: String,

    /// Seconds between readings
    #[arg(long, default_value_t = 5)]
    delay_secs: u64,
}

impl Args {
    /// Check argument combinations clap cannot express
    fn validate(&self) -> anyhow::Result<BrokerAddress> {
        ensure!(!self.sensor_id.trim().is_empty(), "--sensor-id must not be empty");
        ensure!(
            self.min_value <= self.max_value,
            "--min-value must not exceed --max-value"
        );

        BrokerAddress::parse(&self.broker)
            .with_context(|| format!("invalid --broker '{}'", self.broker))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    let address = args.validate()?;
    let mut options = MqttOptions::new("sensor-simulator", address.host.clone(), address.port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let event_task = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT error: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    });

    info!(broker = %address, topic = %args.topic, sensor_id = %args.sensor_id, "Simulator started");

    let mut ticker = tokio::time::interval(Duration::from_secs(args.delay_secs.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let reading = Reading {
                    sensor_id: args.sensor_id.clone(),
                    value: rand::thread_rng().gen_range(args.min_value..=args.max_value),
                    timestamp: Utc::now(),
                };
                let payload = match serde_json::to_vec(&reading) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Failed to encode reading: {}", e);
                        continue;
                    }
                };
                match client.publish(args.topic.as_str(), QoS::AtMostOnce, false, payload).await {
                    Ok(()) => info!(value = reading.value, "Published reading"),
                    Err(e) => error!("Publish failed: {}", e),
                }
            }
        }
    }

    client
        .disconnect()
        .await
        .context("requesting MQTT disconnect")?;
    let _ = tokio::time::timeout(Duration::from_millis(250), event_task).await;
    info!("Sensor simulator stopped");
    Ok(())
}
