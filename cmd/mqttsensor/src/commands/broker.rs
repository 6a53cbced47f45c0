//! Host an MQTT broker.

use std::time::Duration;

use clap::Args;
use mqttsensor::{BrokerConfig, DEFAULT_BROKER_PORT, MqttBroker};
use serde_json::Value;
use tracing::info;

use super::{print_value, print_verbose};
use crate::Cli;

/// Run an embedded broker and print its readings every interval until
/// interrupted.
#[derive(Args)]
pub struct BrokerCommand {
    /// Listen IP address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port
    #[arg(short = 'p', long, default_value_t = DEFAULT_BROKER_PORT)]
    port: u16,

    /// Component name used in logs and errors
    #[arg(long, default_value = "mqttbroker")]
    name: String,

    /// Seconds between readings
    #[arg(short = 'i', long, default_value_t = 10)]
    interval: u64,

    /// Stop after this many readings
    #[arg(short = 'n', long)]
    count: Option<u64>,
}

impl BrokerCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        anyhow::ensure!(self.interval > 0, "interval must be at least 1 second");

        let config = BrokerConfig::new(self.host.clone(), self.port);
        let broker = MqttBroker::start(self.name.clone(), &config).await?;
        print_verbose(cli, &format!("Listening on {}", broker.listen_addr()));

        let mut ticker = tokio::time::interval(Duration::from_secs(self.interval));
        let mut printed = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    print_value(cli, &Value::Object(broker.readings()))?;
                    printed += 1;
                    if self.count.is_some_and(|count| printed >= count) {
                        return Ok(());
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("interrupted, stopping broker {}", broker.name());
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Commands;
    use clap::Parser;

    #[test]
    fn test_broker_flag_defaults() {
        let cli = Cli::try_parse_from(["mqttsensor", "broker"]).unwrap();
        let Commands::Broker(cmd) = cli.command else {
            panic!("expected broker command");
        };
        assert_eq!(cmd.host, "0.0.0.0");
        assert_eq!(cmd.port, 1883);
        assert_eq!(cmd.interval, 10);
        assert_eq!(cmd.count, None);
    }

    #[test]
    fn test_broker_flags() {
        let cli =
            Cli::try_parse_from(["mqttsensor", "broker", "--host", "127.0.0.1", "-p", "1884", "-n", "2"])
                .unwrap();
        let Commands::Broker(cmd) = cli.command else {
            panic!("expected broker command");
        };
        assert_eq!(cmd.host, "127.0.0.1");
        assert_eq!(cmd.port, 1884);
        assert_eq!(cmd.count, Some(2));
    }
}
