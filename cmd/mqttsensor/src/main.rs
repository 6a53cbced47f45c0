//! mqttsensor CLI - run an MQTT sensor from the command line.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{BrokerCommand, PublishCommand, SubCommand, WatchCommand};

/// mqttsensor CLI - subscribe to an MQTT topic and report its latest value.
///
/// Sensor attributes (topic, host, port, qos, format) are read from
/// ~/.mqttsensor/config.yaml or the file given with --config. Command line
/// flags override values from the file. The `broker` command hosts a broker
/// for sensors to connect to.
#[derive(Parser)]
#[command(name = "mqttsensor")]
#[command(about = "MQTT latest-value sensor")]
#[command(version)]
pub struct Cli {
    /// Config file, YAML or JSON (default is ~/.mqttsensor/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Output as JSON (for piping)
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the sensor and print its readings periodically
    Sub(SubCommand),
    /// Print every message published on the topic
    Watch(WatchCommand),
    /// Publish a message to the topic
    #[command(name = "pub")]
    Pub(PublishCommand),
    /// Host an MQTT broker and print its readings periodically
    Broker(BrokerCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Sub(cmd) => cmd.run(&cli).await,
        Commands::Watch(cmd) => cmd.run(&cli).await,
        Commands::Pub(cmd) => cmd.run(&cli).await,
        Commands::Broker(cmd) => cmd.run(&cli).await,
    }
}
