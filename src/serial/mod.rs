//! Byte source of the meter, an IR read head on a serial port.
//!
//! The acquisition loop only sees the [`Connector`] trait so the port can be
//! replaced by scripted streams in tests.

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_serial::SerialPortBuilderExt;

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("Unable to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: tokio_serial::Error,
    },
}

/// Line parameters of the read head
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub device: String,
    pub baudrate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
    pub flow_control: tokio_serial::FlowControl,
}

impl SerialConfig {
    /// 9600 baud 8N1 without flow control as sent by SML meters
    pub fn new(device: &str) -> Self {
        SerialConfig {
            device: device.to_string(),
            baudrate: 9600,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
            flow_control: tokio_serial::FlowControl::None,
        }
    }
}

/// Opens a fresh connection to the meter. Closing happens by dropping the port.
#[async_trait]
pub trait Connector: Send + Sync {
    type Port: AsyncRead + Unpin + Send;

    async fn open(&self) -> Result<Self::Port, SerialError>;

    /// Human readable target, used for logging
    fn describe(&self) -> String;
}

pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    type Port = tokio_serial::SerialStream;

    async fn open(&self) -> Result<Self::Port, SerialError> {
        debug!("Opening serial port {:?}", self.config);

        tokio_serial::new(self.config.device.as_str(), self.config.baudrate)
            .data_bits(self.config.data_bits)
            .stop_bits(self.config.stop_bits)
            .parity(self.config.parity)
            .flow_control(self.config.flow_control)
            .open_native_async()
            .map_err(|source| SerialError::Open {
                device: self.config.device.clone(),
                source,
            })
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.config.device, self.config.baudrate)
    }
}
