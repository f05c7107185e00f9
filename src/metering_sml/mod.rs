use crate::config::MeterConfig;
use crate::metrics::MeterMetrics;
use crate::mqtt::{MeteringData, Transmission};
use crate::serial::{Connector, SerialError};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::Sender;

pub mod structs;
pub mod parser;
pub mod reader;
pub mod utils;

use structs::*;
use parser::*;
use reader::*;

#[derive(Error, Debug)]
pub enum SmlError {
    #[error("Connection failed: {0}")]
    Connection(#[from] SerialError),
    #[error("Framing failed: {0}")]
    Frame(#[from] FrameError),
}

/// Periodically reads one telegram from the meter and hands the decoded
/// readings to the metrics registry and the MQTT sender.
pub struct SmlManager<C: Connector> {
    connector: C,
    mode: ConnectionMode,
    strategy: DecodeStrategy,
    factor: i64,
    interval: Duration,
    read_timeout: Option<Duration>,
    meter_name: String,
    metrics: Arc<MeterMetrics>,
    sender: Option<Sender<Transmission>>,
    iteration: u64,
}

impl<C: Connector> SmlManager<C> {
    pub fn new(connector: C, config: &MeterConfig, metrics: Arc<MeterMetrics>, sender: Option<Sender<Transmission>>) -> Self {
        Self {
            connector,
            mode: ConnectionMode::from_keepalive(config.keepalive),
            strategy: config.layout,
            factor: config.factor,
            interval: config.interval_duration(),
            read_timeout: config.read_timeout_duration(),
            meter_name: config.name.clone(),
            metrics,
            sender,
            iteration: 0,
        }
    }

    /// Runs forever. Only fails if the first connection in persistent mode
    /// can not be opened.
    pub async fn start_thread(&mut self) -> Result<(), SmlError> {
        info!("Starting SML thread for {} in {:?} mode", self.connector.describe(), self.mode);
        self.run(None).await
    }

    /// Runs `max_cycles` acquisition cycles, or forever with `None`
    pub async fn run(&mut self, max_cycles: Option<u64>) -> Result<(), SmlError> {
        let mut port = match self.mode {
            ConnectionMode::Persistent => Some(self.open_connection().await?),
            ConnectionMode::PerCycle => None,
        };

        let mut cycles = 0u64;
        loop {
            if max_cycles.is_some_and(|max| cycles >= max) {
                return Ok(());
            }
            cycles += 1;

            let ok = self.gather_data(&mut port).await;
            if !ok && self.mode == ConnectionMode::Persistent {
                warn!("Data gathering failed, resetting port");
                port = self.reconnect(port.take()).await;
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    async fn open_connection(&self) -> Result<C::Port, SerialError> {
        let started = Instant::now();
        let result = self.connector.open().await;
        self.metrics.observe_connection_setup(started.elapsed());
        result
    }

    /// Drops the old port and opens a new one. A failed open leaves no port,
    /// which fails the next cycle and leads here again.
    async fn reconnect(&self, old: Option<C::Port>) -> Option<C::Port> {
        drop(old);
        self.metrics.inc_connection_resets();

        match self.open_connection().await {
            Ok(port) => Some(port),
            Err(e) => {
                error!("Reconnect failed, retrying next cycle: {}", e);
                None
            }
        }
    }

    /// One cycle of connect, read, decode and publish. Returns `false` if no
    /// telegram could be read.
    async fn gather_data(&mut self, port: &mut Option<C::Port>) -> bool {
        let started = Instant::now();
        info!("Gathering metrics");

        let result = match self.mode {
            ConnectionMode::PerCycle => match self.open_connection().await {
                // Dropping the port at the end of this arm closes it again
                Ok(mut fresh) => self.read_telegram(&mut fresh).await,
                Err(e) => Err(SmlError::Connection(e)),
            },
            ConnectionMode::Persistent => match port.as_mut() {
                Some(existing) => self.read_telegram(existing).await,
                None => {
                    warn!("No open connection to read from");
                    self.metrics.observe_gathering(started.elapsed());
                    return false;
                }
            },
        };

        let ok = match result {
            Ok(telegram) => {
                debug!("Read full message {}", hex::encode(&telegram));
                let readings = decode_readings(&telegram, self.strategy, self.factor);
                self.publish(readings).await;
                true
            }
            Err(e) => {
                error!("Failed to read message, skipping: {}", e);
                false
            }
        };

        self.metrics.observe_gathering(started.elapsed());
        ok
    }

    async fn read_telegram(&self, port: &mut C::Port) -> Result<Vec<u8>, SmlError> {
        let telegram = read_frame_with_timeout(port, &START_SEQUENCE, &STOP_SEQUENCE, self.read_timeout).await?;
        Ok(telegram)
    }

    async fn publish(&mut self, readings: Vec<Reading>) {
        for reading in &readings {
            info!("Recording meter {} with value {}", reading.identifier, reading.value);
        }
        self.metrics.set_readings(&readings);

        if let Some(sender) = &self.sender {
            let data = MeteringData {
                meter_name: self.meter_name.clone(),
                iteration: self.iteration,
                readings,
            };
            if let Err(e) = sender.try_send(Transmission::Metering(data)) {
                error!("Failed to hand readings to MQTT: {}", e);
            }
        }
        self.iteration += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::serial::mock::{MockConnector, ReadStep, ScriptedPort};
    use std::io;
    use std::sync::atomic::Ordering;

    fn meter_config(keepalive: bool) -> MeterConfig {
        let mut config = Config::parse("meter:\n  name: house\n  interval: 0").unwrap().meter;
        config.keepalive = keepalive;
        config
    }

    fn telegram(value: u64) -> Vec<u8> {
        let mut data = START_SEQUENCE.to_vec();
        data.extend_from_slice(&[0x76, 0x05, 0x00]);
        data.extend_from_slice(&RECORD_PREFIX);
        data.extend_from_slice(&[0x01, 0x08, 0x00, 0xFF, 0x01, 0x01]);
        data.extend_from_slice(&WATT_HOUR_UNIT);
        data.extend_from_slice(&[0x52, 0xFF, 0x59]);
        data.extend_from_slice(&value.to_be_bytes());
        data.extend_from_slice(&[0x01, 0x01]);
        data.extend_from_slice(&STOP_SEQUENCE);
        data.extend_from_slice(&[0x01, 0xAB, 0xCD]);
        data
    }

    #[tokio::test]
    async fn test_persistent_reuses_connection() {
        let port = ScriptedPort::new(vec![ReadStep::Data(telegram(100)), ReadStep::Data(telegram(200))]);

        let connector = MockConnector::new(vec![Some(port)]);
        let opens = connector.open_counter();
        let metrics = Arc::new(MeterMetrics::new("house"));
        let mut manager = SmlManager::new(connector, &meter_config(true), metrics.clone(), None);

        manager.run(Some(2)).await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.readings.get("1.8.0"), Some(&200.0));
        assert_eq!(snapshot.connection_resets, 0);
        assert_eq!(snapshot.gathering_duration.count, 2);
        assert_eq!(snapshot.connection_setup.count, 1);
    }

    #[tokio::test]
    async fn test_persistent_reconnects_after_failure() {
        let broken = ScriptedPort::failing(io::ErrorKind::BrokenPipe);
        let healthy = ScriptedPort::with_data(&telegram(42));

        let connector = MockConnector::new(vec![Some(broken), Some(healthy)]);
        let opens = connector.open_counter();
        let metrics = Arc::new(MeterMetrics::new("house"));
        let mut manager = SmlManager::new(connector, &meter_config(true), metrics.clone(), None);

        manager.run(Some(2)).await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(snapshot.connection_resets, 1);
        assert_eq!(snapshot.readings.get("1.8.0"), Some(&42.0));
    }

    #[tokio::test]
    async fn test_persistent_failed_reconnect_is_retried() {
        let broken = ScriptedPort::failing(io::ErrorKind::BrokenPipe);
        let healthy = ScriptedPort::with_data(&telegram(7));

        // Reopen after cycle 1 fails, cycle 2 has no port and reconnects again
        let connector = MockConnector::new(vec![Some(broken), None, Some(healthy)]);
        let opens = connector.open_counter();
        let metrics = Arc::new(MeterMetrics::new("house"));
        let mut manager = SmlManager::new(connector, &meter_config(true), metrics.clone(), None);

        manager.run(Some(3)).await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert_eq!(snapshot.connection_resets, 2);
        assert_eq!(snapshot.readings.get("1.8.0"), Some(&7.0));
    }

    #[tokio::test]
    async fn test_persistent_first_open_is_fatal() {
        let connector = MockConnector::new(vec![None]);
        let metrics = Arc::new(MeterMetrics::new("house"));
        let mut manager = SmlManager::new(connector, &meter_config(true), metrics.clone(), None);

        let result = manager.run(Some(1)).await;
        assert!(matches!(result, Err(SmlError::Connection(_))));
        assert_eq!(metrics.snapshot().gathering_duration.count, 0);
    }

    #[tokio::test]
    async fn test_per_cycle_opens_every_cycle() {
        let connector = MockConnector::new(vec![
            Some(ScriptedPort::with_data(&telegram(1))),
            None,
            Some(ScriptedPort::with_data(&telegram(3))),
        ]);
        let opens = connector.open_counter();
        let metrics = Arc::new(MeterMetrics::new("house"));
        let mut manager = SmlManager::new(connector, &meter_config(false), metrics.clone(), None);

        // The open failure in cycle two is not fatal
        manager.run(Some(3)).await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert_eq!(snapshot.connection_resets, 0);
        assert_eq!(snapshot.connection_setup.count, 3);
        assert_eq!(snapshot.readings.get("1.8.0"), Some(&3.0));
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_last_values() {
        let connector = MockConnector::new(vec![
            Some(ScriptedPort::with_data(&telegram(10))),
            Some(ScriptedPort::failing(io::ErrorKind::TimedOut)),
        ]);
        let metrics = Arc::new(MeterMetrics::new("house"));
        let mut manager = SmlManager::new(connector, &meter_config(false), metrics.clone(), None);

        manager.run(Some(2)).await.unwrap();
        assert_eq!(metrics.snapshot().readings.get("1.8.0"), Some(&10.0));
    }

    #[tokio::test]
    async fn test_readings_are_sent_to_mqtt() {
        let connector = MockConnector::new(vec![
            Some(ScriptedPort::with_data(&telegram(1000))),
            Some(ScriptedPort::failing(io::ErrorKind::BrokenPipe)),
            Some(ScriptedPort::with_data(&telegram(1001))),
        ]);
        let metrics = Arc::new(MeterMetrics::new("house"));
        let (tx, mut rx) = tokio::sync::mpsc::channel(10);
        let mut config = meter_config(false);
        config.factor = 10;
        let mut manager = SmlManager::new(connector, &config, metrics, Some(tx));

        manager.run(Some(3)).await.unwrap();

        let mut received = Vec::new();
        while let Ok(Transmission::Metering(data)) = rx.try_recv() {
            received.push(data);
        }
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].meter_name, "house");
        assert_eq!(received[0].iteration, 0);
        assert_eq!(received[0].readings, vec![Reading::new("1.8.0".to_string(), 100.0)]);
        assert_eq!(received[1].iteration, 1);
        assert_eq!(received[1].readings[0].value, 100.1);
    }

    #[tokio::test]
    async fn test_round_trip_through_reader_and_decoder() {
        let pairs: Vec<((u8, u8, u8), u64)> = vec![((1, 8, 0), 123_456_789), ((1, 8, 1), 0), ((2, 8, 0), 77)];

        let mut data = vec![0x00, 0x42];
        data.extend_from_slice(&START_SEQUENCE);
        data.extend_from_slice(&[0x76, 0x05, 0x00]);
        for ((c, d, e), value) in &pairs {
            data.extend_from_slice(&RECORD_PREFIX);
            data.extend_from_slice(&[*c, *d, *e, 0xFF, 0x01, 0x01]);
            data.extend_from_slice(&WATT_HOUR_UNIT);
            data.extend_from_slice(&[0x52, 0xFF, 0x59]);
            data.extend_from_slice(&value.to_be_bytes());
            data.push(0x01);
        }
        data.extend_from_slice(&STOP_SEQUENCE);

        let chunks: Vec<ReadStep> = data.chunks(7).map(|c| ReadStep::Data(c.to_vec())).collect();
        let mut port = ScriptedPort::new(chunks);

        let frame = read_frame(&mut port, &START_SEQUENCE, &STOP_SEQUENCE).await.unwrap();
        let readings = decode_readings(&frame, DecodeStrategy::UnitMarker, 4);

        let expected: Vec<Reading> = pairs
            .iter()
            .map(|((c, d, e), value)| Reading::new(format!("{}.{}.{}", c, d, e), *value as f64 / 4.0))
            .collect();
        assert_eq!(readings, expected);
    }
}
