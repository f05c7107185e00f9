//! Pull based metrics of the exporter, rendered in the Prometheus text format
//! by the `/metrics` endpoint.

use crate::metering_sml::structs::Reading;
use chrono::{DateTime, Utc};
use log::error;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::RwLock;
use std::time::Duration;

const NAMESPACE: &str = "powermeter";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    pub count: u64,
    pub sum: f64,
}

impl Summary {
    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub readings: BTreeMap<String, f64>,
    pub gathering_duration: Summary,
    pub connection_setup: Summary,
    pub connection_resets: u64,
    pub mqtt_connected: bool,
    pub mqtt_messages: u64,
    pub last_reading: Option<DateTime<Utc>>,
}

/// Thread safe registry for one meter. All readings of a cycle are written
/// under one lock so a scrape never mixes two cycles.
pub struct MeterMetrics {
    meter_name: String,
    state: RwLock<MetricsSnapshot>,
}

impl MeterMetrics {
    pub fn new(meter_name: &str) -> Self {
        Self {
            meter_name: meter_name.to_string(),
            state: RwLock::new(MetricsSnapshot::default()),
        }
    }

    pub fn meter_name(&self) -> &str {
        &self.meter_name
    }

    fn update<F: FnOnce(&mut MetricsSnapshot)>(&self, f: F) {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(e) => error!("Metrics lock poisoned: {}", e),
        }
    }

    pub fn set_readings(&self, readings: &[Reading]) {
        self.update(|state| {
            for reading in readings {
                state.readings.insert(reading.identifier.clone(), reading.value);
            }
            state.last_reading = Some(Utc::now());
        });
    }

    pub fn observe_gathering(&self, duration: Duration) {
        self.update(|state| state.gathering_duration.observe(duration.as_secs_f64()));
    }

    pub fn observe_connection_setup(&self, duration: Duration) {
        self.update(|state| state.connection_setup.observe(duration.as_secs_f64()));
    }

    pub fn inc_connection_resets(&self) {
        self.update(|state| state.connection_resets += 1);
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.update(|state| state.mqtt_connected = connected);
    }

    pub fn inc_mqtt_messages(&self) {
        self.update(|state| state.mqtt_messages += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    /// Renders all metrics in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let state = self.snapshot();
        let meter = escape_label(&self.meter_name);
        let mut out = String::new();

        header(&mut out, "reading", "gauge", "Current meter reading for consumed energy (unit depends on OBIS id)");
        for (id, value) in &state.readings {
            let _ = writeln!(
                out,
                "{NAMESPACE}_reading{{meter_name=\"{}\",meter_id=\"{}\"}} {}",
                meter,
                escape_label(id),
                format_value(*value)
            );
        }

        summary(&mut out, "gatheringduration", "The duration of data gatherings", &meter, &state.gathering_duration);
        summary(&mut out, "connection_setup", "The duration of connection setups", &meter, &state.connection_setup);

        header(&mut out, "connection_reset", "counter", "The number of connections resets");
        let _ = writeln!(out, "{NAMESPACE}_connection_reset{{meter_name=\"{}\"}} {}", meter, state.connection_resets);

        header(&mut out, "mqtt_connected", "gauge", "Status of the MQTT connection");
        let _ = writeln!(
            out,
            "{NAMESPACE}_mqtt_connected{{meter_name=\"{}\"}} {}",
            meter,
            if state.mqtt_connected { 1 } else { 0 }
        );

        header(&mut out, "mqtt_messages", "counter", "Number of MQTT message sent");
        let _ = writeln!(out, "{NAMESPACE}_mqtt_messages{{meter_name=\"{}\"}} {}", meter, state.mqtt_messages);

        out
    }
}

fn header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {NAMESPACE}_{name} {help}");
    let _ = writeln!(out, "# TYPE {NAMESPACE}_{name} {kind}");
}

fn summary(out: &mut String, name: &str, help: &str, meter: &str, value: &Summary) {
    header(out, name, "summary", help);
    let _ = writeln!(out, "{NAMESPACE}_{name}_sum{{meter_name=\"{}\"}} {}", meter, format_value(value.sum));
    let _ = writeln!(out, "{NAMESPACE}_{name}_count{{meter_name=\"{}\"}} {}", meter, value.count);
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf".to_string() } else { "-Inf".to_string() }
    } else {
        value.to_string()
    }
}

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}
