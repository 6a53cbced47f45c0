//! Print every message published on a topic.

use std::sync::Arc;

use clap::Args;
use mqttsensor::PayloadFormat;
use mqttsensor_mqtt::{Dialer, Message, Router, handler_func};
use serde_json::{Value, json};
use tracing::info;

use super::print_verbose;
use crate::Cli;
use crate::config::ConnectArgs;

/// Subscribe the topic and print each message as it arrives.
///
/// Payloads are shown as JSON when they decode as an object and as text
/// otherwise. Wildcard filters such as `sensors/#` are accepted: messages
/// that match no exact route go to the same printer.
#[derive(Args)]
pub struct WatchCommand {
    #[command(flatten)]
    connect: ConnectArgs,

    /// MQTT client ID (random if unset)
    #[arg(long)]
    client_id: Option<String>,
}

impl WatchCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = self.connect.resolve(cli.config.as_deref())?;
        let settings = config.validate_filter("watch")?;
        print_verbose(cli, &format!("Broker: {}", settings.broker_url()));

        let json_output = cli.json;
        let printer = handler_func(move |msg| {
            print_message(msg, json_output);
            Ok(())
        });

        let router = Arc::new(Router::new());
        router.set_fallback(printer.clone());

        let mut dialer = Dialer::new().with_router(router);
        if let Some(id) = &self.client_id {
            dialer = dialer.with_id(id.clone());
        }
        let conn = dialer.dial_host(&settings.host, settings.port).await?;

        let granted = conn.subscribe(&settings.topic, settings.qos, printer).await?;
        print_verbose(cli, &format!("Granted QoS: {}", granted.level()));

        tokio::signal::ctrl_c().await?;
        info!("interrupted, closing connection");
        conn.close().await?;
        Ok(())
    }
}

fn describe(msg: &Message) -> Value {
    // Auto never fails: non-object payloads come back as raw bytes.
    let payload = PayloadFormat::Auto
        .decode(&msg.payload)
        .map(|p| p.to_value())
        .unwrap_or(Value::Null);

    json!({
        "topic": msg.topic,
        "qos": msg.qos.level(),
        "retain": msg.retain,
        "payload": payload,
    })
}

fn print_message(msg: &Message, json_output: bool) {
    let value = describe(msg);
    if json_output {
        println!("{}", value);
        return;
    }

    println!("------------------------------");
    println!("topic: {}", msg.topic);
    println!("qos: {}", msg.qos.level());
    match &value["payload"] {
        Value::String(text) => println!("text: {}", text),
        other => println!("json: {}", other),
    }
}
