use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport closed: {0}")]
pub struct SinkError(pub String);

/// Where a connection's frames go. A failed send is final.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), SinkError>;
}

/// Sink backed by a bounded channel; the receiver side owns the transport.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<(), SinkError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| SinkError("receiver dropped".to_string()))
    }
}
