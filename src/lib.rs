//! Powermeter exporter library
//!
//! Reads SML telegrams from an IR read head, decodes the OBIS energy registers
//! and exposes them for Prometheus and MQTT.

pub mod api;
pub mod config;
pub mod metering_sml;
pub mod metrics;
pub mod mqtt;
pub mod obis_utils;
pub mod serial;

// Re-export common types for easier access
pub use api::ApiManager;
pub use config::Config;
pub use metering_sml::SmlManager;
pub use metrics::MeterMetrics;
pub use mqtt::{MeteringData, MqttManager};
