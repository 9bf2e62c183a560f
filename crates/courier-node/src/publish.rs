use async_trait::async_trait;
use courier_codec::{EbxmlEnvelope, Part};
use tokio::sync::mpsc;

use crate::error::PublishError;

/// Payload handed to the application once per message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredPayload {
    pub message_id: String,
    pub conversation_id: String,
    pub from_party: String,
    pub service: String,
    pub action: String,
    /// Every part after the envelope, in wire order.
    pub parts: Vec<Part>,
}

impl DeliveredPayload {
    pub fn from_exchange(envelope: &EbxmlEnvelope, parts: Vec<Part>) -> Self {
        Self {
            message_id: envelope.message_data.message_id.clone(),
            conversation_id: envelope.conversation_id.clone(),
            from_party: envelope.from_party.clone(),
            service: envelope.service.clone(),
            action: envelope.action.clone(),
            parts,
        }
    }
}

/// Application-side sink for verified inbound payloads.
#[async_trait]
pub trait PayloadPublisher: Send + Sync {
    async fn publish(&self, payload: DeliveredPayload) -> Result<(), PublishError>;
}

/// Publisher feeding a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<DeliveredPayload>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DeliveredPayload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PayloadPublisher for ChannelPublisher {
    async fn publish(&self, payload: DeliveredPayload) -> Result<(), PublishError> {
        self.tx.send(payload).await.map_err(|_| PublishError::Closed)
    }
}
