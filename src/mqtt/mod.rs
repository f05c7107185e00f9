pub mod ha_interface;
pub mod tls;

use crate::config::MqttConfig;
use crate::metering_sml::structs::Reading;
use crate::metrics::MeterMetrics;
use crate::mqtt::ha_interface::HaSensorDiscovery;
use crate::obis_utils;
use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub enum MqttConnectionStatus {
    Disabled,
    Connected,
    Disconnected,
    Reconnecting,
}

#[derive(Clone)]
pub struct MqttHealthStatus {
    pub status: MqttConnectionStatus,
    pub last_connected: Option<Instant>,
    pub last_message_sent: Option<Instant>,
    pub connection_attempts: u64,
}

#[derive(Clone)]
pub struct AppStatus {
    pub start_time: Instant,
    pub mqtt_health: MqttHealthStatus,
}

impl MqttHealthStatus {
    pub fn new() -> Self {
        Self {
            status: MqttConnectionStatus::Disabled,
            last_connected: None,
            last_message_sent: None,
            connection_attempts: 0,
        }
    }
}

impl AppStatus {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_health: MqttHealthStatus::new(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl MqttHealthStatus {
    pub fn seconds_since_connected(&self) -> Option<u64> {
        self.last_connected.map(|t| t.elapsed().as_secs())
    }

    pub fn seconds_since_message(&self) -> Option<u64> {
        self.last_message_sent.map(|t| t.elapsed().as_secs())
    }
}

lazy_static! {
    pub static ref APP_STATUS: RwLock<AppStatus> = RwLock::new(AppStatus::new());
}

pub async fn get_app_status() -> AppStatus {
    APP_STATUS.read().await.clone()
}

/// Readings of one acquisition cycle
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MeteringData {
    pub meter_name: String,
    pub iteration: u64,
    pub readings: Vec<Reading>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub enum Transmission {
    Metering(MeteringData),
}

pub fn state_topic(prefix: &str, meter_name: &str, identifier: &str) -> String {
    format!("{}/{}/{}", prefix, meter_name, identifier)
}

/// Turns metering data into the MQTT messages to send
pub struct Publisher {
    config: MqttConfig,
}

impl Publisher {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    /// One state message per reading, followed by its discovery document on
    /// every `discovery_interval`-th iteration
    pub fn publications(&self, data: &MeteringData) -> Vec<PublishData> {
        let with_discovery = data.iteration % self.config.discovery_interval.max(1) == 0;
        debug!("Publishing iteration {}, with discovery set to {}", data.iteration, with_discovery);

        let mut messages = Vec::with_capacity(data.readings.len() * 2);
        for reading in &data.readings {
            let topic = state_topic(&self.config.topic_prefix, &data.meter_name, &reading.identifier);
            messages.push(PublishData {
                topic: topic.clone(),
                payload: format!("{:.6}", reading.value),
                qos: 0,
                retain: false,
            });

            if with_discovery {
                let disc = HaSensorDiscovery::new_energy(
                    &self.config.discovery_prefix,
                    &data.meter_name,
                    &reading.identifier,
                    obis_utils::display_name(&reading.identifier),
                    topic,
                    &self.config.unit,
                );
                match serde_json::to_string(&disc) {
                    Ok(payload) => messages.push(PublishData {
                        topic: disc.discover_topic.clone(),
                        payload,
                        qos: 0,
                        retain: true,
                    }),
                    Err(e) => error!("Unable to serialize discovery for {}: {}", reading.identifier, e),
                }
            }
        }
        messages
    }
}

const CLIENT_QUEUE_SIZE: usize = 100;

fn to_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    client: AsyncClient,
    publisher: Publisher,
    metrics: Arc<MeterMetrics>,
}

impl MqttManager {
    pub fn new(config: &MqttConfig, metrics: Arc<MeterMetrics>) -> (Self, Sender<Transmission>) {
        let (mtx, mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if !config.user.is_empty() && !config.pass.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }
        mqttoptions.set_transport(tls::transport(config));

        // Room for a full discovery cycle of a meter with many registers
        let (client, mut eventloop) = AsyncClient::new(mqttoptions, CLIENT_QUEUE_SIZE);

        // Polling drives the connection, rumqttc reconnects on the next poll after an error
        let loop_metrics = metrics.clone();
        tokio::spawn(async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                        loop_metrics.set_mqtt_connected(true);
                        let mut app_status = APP_STATUS.write().await;
                        app_status.mqtt_health.status = MqttConnectionStatus::Connected;
                        app_status.mqtt_health.last_connected = Some(Instant::now());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection lost: {:?}, reconnecting", e);
                        loop_metrics.set_mqtt_connected(false);
                        {
                            let mut app_status = APP_STATUS.write().await;
                            app_status.mqtt_health.status = MqttConnectionStatus::Reconnecting;
                            app_status.mqtt_health.connection_attempts += 1;
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        return (MqttManager {
            rx: mrx,
            client,
            publisher: Publisher::new(config.clone()),
            metrics,
        }, mtx);
    }

    pub async fn start_thread(&mut self) {
        APP_STATUS.write().await.mqtt_health.status = MqttConnectionStatus::Disconnected;

        while let Some(transmission) = self.rx.recv().await {
            match transmission {
                Transmission::Metering(data) => {
                    info!("Metering data received for {} with {} readings", data.meter_name, data.readings.len());
                    for message in self.publisher.publications(&data) {
                        self.publish(message).await;
                    }
                }
            }
        }

        info!("MQTT channel closed, thread exits");
    }

    /// Queues a message for the event loop, waiting while the client queue is
    /// full. The metering side never waits on this, it hands off with `try_send`.
    async fn publish(&self, message: PublishData) {
        debug!("Publishing {} to {}", message.payload, message.topic);
        match self.client.publish(message.topic.clone(), to_qos(message.qos), message.retain, message.payload).await {
            Err(e) => {
                error!("Error publishing to {}: {}", message.topic, e);
            }
            Ok(_) => {
                self.metrics.inc_mqtt_messages();
                APP_STATUS.write().await.mqtt_health.last_message_sent = Some(Instant::now());
            }
        }
    }
}
