//! Run the sensor and poll its readings.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use mqttsensor::{MqttSensor, MqttTransport};
use serde_json::Value;
use tracing::info;

use super::{print_value, print_verbose};
use crate::Cli;
use crate::config::ConnectArgs;

/// Subscribe the topic and print the sensor's readings every interval
/// until interrupted.
#[derive(Args)]
pub struct SubCommand {
    #[command(flatten)]
    connect: ConnectArgs,

    /// Sensor name used in logs and errors
    #[arg(long, default_value = "mqttsensor")]
    name: String,

    /// MQTT client ID (random if unset)
    #[arg(long)]
    client_id: Option<String>,

    /// Seconds between readings
    #[arg(short = 'i', long, default_value_t = 1)]
    interval: u64,

    /// Stop after this many readings
    #[arg(short = 'n', long)]
    count: Option<u64>,
}

impl SubCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        anyhow::ensure!(self.interval > 0, "interval must be at least 1 second");

        let config = self.connect.resolve(cli.config.as_deref())?;
        print_verbose(cli, &format!("Topic: {}", config.topic));
        print_verbose(cli, &format!("Broker: {}:{}", config.host, config.port));

        let mut transport = MqttTransport::new();
        if let Some(id) = &self.client_id {
            transport = transport.with_client_id(id.clone());
        }

        let sensor = MqttSensor::new(self.name.clone(), &config, Arc::new(transport)).await?;

        let result = self.poll(cli, &sensor).await;
        sensor.close().await?;
        result
    }

    async fn poll(&self, cli: &Cli, sensor: &MqttSensor) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.interval));
        let mut printed = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    print_value(cli, &Value::Object(sensor.readings()))?;
                    printed += 1;
                    if self.count.is_some_and(|count| printed >= count) {
                        return Ok(());
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("interrupted, closing sensor {}", sensor.name());
                    return Ok(());
                }
            }
        }
    }
}
