//! Publish messages to a topic.

use std::time::Duration;

use clap::Args;
use mqttsensor_mqtt::{Dialer, WriteOption};
use tracing::info;

use super::print_verbose;
use crate::Cli;
use crate::config::ConnectArgs;

/// Publish a message to the topic, optionally several times.
#[derive(Args)]
pub struct PublishCommand {
    #[command(flatten)]
    connect: ConnectArgs,

    /// Message payload
    #[arg(short = 'm', long)]
    message: String,

    /// Number of times to publish
    #[arg(short = 'n', long, default_value_t = 1)]
    count: u32,

    /// Milliseconds between messages
    #[arg(short = 'i', long, default_value_t = 1000)]
    interval: u64,

    /// Set the retain flag
    #[arg(long)]
    retain: bool,

    /// MQTT client ID (random if unset)
    #[arg(long)]
    client_id: Option<String>,
}

impl PublishCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = self.connect.resolve(cli.config.as_deref())?;
        let settings = config.validate("pub")?;

        let mut dialer = Dialer::new();
        if let Some(id) = &self.client_id {
            dialer = dialer.with_id(id.clone());
        }
        let conn = dialer.dial_host(&settings.host, settings.port).await?;

        let mut opts = vec![WriteOption::Qos(settings.qos)];
        if self.retain {
            opts.push(WriteOption::Retain);
        }

        for i in 0..self.count {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(self.interval)).await;
            }
            conn.write_to_topic_with_opts(self.message.as_bytes(), &settings.topic, &opts)
                .await?;
            print_verbose(cli, &format!("Published {}/{} to {}", i + 1, self.count, settings.topic));
        }

        info!("published {} message(s) to {}", self.count, settings.topic);
        conn.close().await?;
        Ok(())
    }
}
