//! Scripted byte sources for exercising the acquisition loop without hardware

use super::{Connector, SerialError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

pub enum ReadStep {
    Data(Vec<u8>),
    Error(io::ErrorKind),
}

/// Port that replays a fixed list of reads and reports end of stream afterwards
pub struct ScriptedPort {
    steps: VecDeque<ReadStep>,
}

impl ScriptedPort {
    pub fn new(steps: Vec<ReadStep>) -> Self {
        Self { steps: steps.into() }
    }

    /// A port that delivers `data` in one read
    pub fn with_data(data: &[u8]) -> Self {
        Self::new(vec![ReadStep::Data(data.to_vec())])
    }

    pub fn failing(kind: io::ErrorKind) -> Self {
        Self::new(vec![ReadStep::Error(kind)])
    }
}

impl AsyncRead for ScriptedPort {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.steps.pop_front() {
            Some(ReadStep::Data(mut data)) => {
                let count = data.len().min(buf.remaining());
                buf.put_slice(&data[..count]);
                if count < data.len() {
                    let rest = data.split_off(count);
                    self.steps.push_front(ReadStep::Data(rest));
                }
                Poll::Ready(Ok(()))
            }
            Some(ReadStep::Error(kind)) => Poll::Ready(Err(io::Error::new(kind, "scripted failure"))),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Hands out the queued ports in order, `None` entries and an empty queue
/// simulate a device that can not be opened.
pub struct MockConnector {
    ports: Mutex<VecDeque<Option<ScriptedPort>>>,
    opens: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(ports: Vec<Option<ScriptedPort>>) -> Self {
        Self {
            ports: Mutex::new(ports.into()),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of open attempts, stays valid after the connector moved
    pub fn open_counter(&self) -> Arc<AtomicUsize> {
        self.opens.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Port = ScriptedPort;

    async fn open(&self) -> Result<Self::Port, SerialError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.ports.lock().unwrap().pop_front().flatten();
        next.ok_or_else(|| SerialError::Open {
            device: "mock".to_string(),
            source: tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "scripted open failure"),
        })
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
