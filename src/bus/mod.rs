//! Message bus seam
//!
//! The worker consumes a stream of [`Envelope`](crate::messages::Envelope)s
//! and answers through a [`Publisher`]. A durable broker client plugs in here;
//! [`stdio`] provides a JSON-lines transport and [`ChannelPublisher`] an
//! in-process one.

pub mod stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::messages::OutboundMessage;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus connection closed")]
    Closed,

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Bus I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BusError>;
}

/// Publishes into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BusError> {
        self.sender.send(message).map_err(|_| BusError::Closed)
    }
}
