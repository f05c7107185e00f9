use crate::metering_sml::structs::DecodeStrategy;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to parse config: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn httpd_port_default() -> u16 { return 8080 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct HttpdConfig {
    #[serde(default="httpd_port_default")]
    pub port: u16
}

fn meter_name_default() -> String { return "".to_string() }
fn meter_device_default() -> String { return "/dev/irmeter0".to_string() }
fn meter_interval_default() -> u64 { return 60 }
fn meter_factor_default() -> i64 { return 1 }
fn meter_keepalive_default() -> bool { return false }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MeterConfig {
    /// Value of the `meter_name` label and part of the MQTT topics
    #[serde(default="meter_name_default")]
    pub name: String,
    #[serde(default="meter_device_default")]
    pub device: String,
    /// Seconds to sleep between two reads
    #[serde(default="meter_interval_default")]
    pub interval: u64,
    /// Reduction factor for all readings
    #[serde(default="meter_factor_default")]
    pub factor: i64,
    /// Keep the serial connection open between reads
    #[serde(default="meter_keepalive_default")]
    pub keepalive: bool,
    #[serde(default)]
    pub layout: DecodeStrategy,
    /// Seconds a single telegram read may take, unlimited if not set
    #[serde(default)]
    pub read_timeout: Option<u64>,
}

impl MeterConfig {
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn read_timeout_duration(&self) -> Option<Duration> {
        self.read_timeout.map(Duration::from_secs)
    }
}

fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_client_name_default() -> String { return "powermeter-exporter".to_string() }
fn mqtt_topic_prefix_default() -> String { return "powermeter".to_string() }
fn mqtt_discovery_prefix_default() -> String { return "homeassistant".to_string() }
fn mqtt_discovery_interval_default() -> u64 { return 10 }
fn mqtt_unit_default() -> String { return "kWh".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub tls: bool,
    /// Accept any broker certificate, only used together with `tls`
    #[serde(default)]
    pub tls_insecure: bool,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    #[serde(default="mqtt_topic_prefix_default")]
    pub topic_prefix: String,
    #[serde(default="mqtt_discovery_prefix_default")]
    pub discovery_prefix: String,
    /// Publish the discovery documents every n-th cycle
    #[serde(default="mqtt_discovery_interval_default")]
    pub discovery_interval: u64,
    /// Unit announced in the discovery documents
    #[serde(default="mqtt_unit_default")]
    pub unit: String,
}

fn httpd_default() -> HttpdConfig { return HttpdConfig { port: httpd_port_default() } }
fn meter_default() -> MeterConfig {
    return MeterConfig {
        name: meter_name_default(),
        device: meter_device_default(),
        interval: meter_interval_default(),
        factor: meter_factor_default(),
        keepalive: meter_keepalive_default(),
        layout: DecodeStrategy::default(),
        read_timeout: None,
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,
    #[serde(default="meter_default")]
    pub meter: MeterConfig,
    #[serde(default="httpd_default")]
    pub httpd: HttpdConfig,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

pub const CONFIG_ENV: &str = "PM_CONFIG";
const CONFIG_PATHS: [&str; 2] = ["config/powermeter.yaml", "powermeter.yaml"];

impl Config {
    /// Loads the config from `PM_CONFIG` or the first of the default paths and
    /// applies the environment overrides. Without any file the defaults are used.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load_from(&path)?,
            Err(_) => match CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
                Some(path) => Self::load_from(path)?,
                None => {
                    warn!("No config file found, using defaults");
                    Self::parse("{}")?
                }
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        info!("Loading config from {}", path);
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yml::from_str(contents)?;
        Ok(config)
    }

    /// `EXPORTER_PORT` and `INTERVAL` take precedence over the file
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("EXPORTER_PORT") {
            debug!("Overriding httpd port with {}", port);
            self.httpd.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("EXPORTER_PORT is not a port: {port}")))?;
        }
        if let Some(interval) = lookup("INTERVAL") {
            debug!("Overriding interval with {}", interval);
            self.meter.interval = interval
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("INTERVAL is not a number of seconds: {interval}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meter.factor <= 0 {
            return Err(ConfigError::Invalid(format!("meter.factor must be positive, got {}", self.meter.factor)));
        }
        if self.meter.device.is_empty() {
            return Err(ConfigError::Invalid("meter.device must not be empty".to_string()));
        }
        if let Some(mqtt) = &self.mqtt {
            if mqtt.discovery_interval == 0 {
                return Err(ConfigError::Invalid("mqtt.discovery_interval must be at least 1".to_string()));
            }
            if mqtt.host.is_empty() {
                return Err(ConfigError::Invalid("mqtt.host must not be empty".to_string()));
            }
        }
        Ok(())
    }
}
