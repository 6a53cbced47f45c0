//! Sensor configuration loading for the CLI.
//!
//! Configuration is stored in ~/.mqttsensor/config.yaml. A file ending in
//! `.json` is read as JSON, anything else as YAML.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, ValueEnum};
use mqttsensor::{PayloadFormat, SensorConfig};

/// Default configuration directory name.
pub const DEFAULT_BASE_DIR: &str = ".mqttsensor";
/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Gets the default config file path.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR).join(DEFAULT_CONFIG_FILE))
}

/// Load the sensor config.
///
/// An explicit `path` must exist. The default file is optional; without it
/// every attribute has to come from flags.
pub fn load(path: Option<&str>) -> anyhow::Result<SensorConfig> {
    match path {
        Some(path) => load_file(Path::new(path)),
        None => match default_config_path() {
            Some(path) if path.exists() => load_file(&path),
            _ => Ok(SensorConfig::default()),
        },
    }
}

/// Read a config file, picking the decoder by extension.
pub fn load_file(path: &Path) -> anyhow::Result<SensorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse JSON config: {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse YAML config: {}", path.display()))?
    };
    Ok(config)
}

/// Payload format flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Json,
    Raw,
    Auto,
}

impl From<FormatArg> for PayloadFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Json => PayloadFormat::Json,
            FormatArg::Raw => PayloadFormat::Raw,
            FormatArg::Auto => PayloadFormat::Auto,
        }
    }
}

/// Broker and topic flags shared by all commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Topic (overrides config)
    #[arg(short = 't', long)]
    pub topic: Option<String>,

    /// Broker host (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Broker port (overrides config)
    #[arg(short = 'p', long, allow_negative_numbers = true)]
    pub port: Option<i64>,

    /// QoS level 0, 1 or 2 (overrides config)
    #[arg(short = 'q', long, allow_negative_numbers = true)]
    pub qos: Option<i64>,

    /// Payload format (overrides config)
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,
}

impl ConnectArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, mut config: SensorConfig) -> SensorConfig {
        if let Some(topic) = &self.topic {
            config.topic = topic.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(qos) = self.qos {
            config.qos = qos;
        }
        if let Some(format) = self.format {
            config.format = format.into();
        }
        config
    }

    /// Load the config named by `--config` and apply these flags.
    pub fn resolve(&self, config_path: Option<&str>) -> anyhow::Result<SensorConfig> {
        Ok(self.apply(load(config_path)?))
    }
}
