//! CLI commands module.

mod broker;
mod publish;
mod sub;
mod watch;

pub use broker::BrokerCommand;
pub use publish::PublishCommand;
pub use sub::SubCommand;
pub use watch::WatchCommand;

use serde_json::Value;

use crate::Cli;

/// Print a value as a single JSON line with `--json`, pretty otherwise.
pub(crate) fn print_value(cli: &Cli, value: &Value) -> anyhow::Result<()> {
    let text = if cli.json {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", text);
    Ok(())
}

/// Print a message to stderr when `--verbose` is set.
pub(crate) fn print_verbose(cli: &Cli, msg: &str) {
    if cli.verbose {
        eprintln!("[verbose] {}", msg);
    }
}
