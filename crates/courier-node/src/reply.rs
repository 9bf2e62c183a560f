use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_codec::EbxmlEnvelope;
use tracing::debug;

use crate::error::DeliveryError;
use crate::sender::ReliableSender;

/// Emits asynchronous acknowledgments and notifications to peers.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    async fn dispatch(&self, reply: &EbxmlEnvelope) -> Result<(), DeliveryError>;
}

/// Reply endpoints by party id, with an optional fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyRoutes {
    by_party: HashMap<String, String>,
    fallback: Option<String>,
}

impl ReplyRoutes {
    pub fn new(fallback: Option<String>) -> Self {
        Self {
            by_party: HashMap::new(),
            fallback,
        }
    }

    pub fn insert(&mut self, party: impl Into<String>, endpoint: impl Into<String>) {
        self.by_party.insert(party.into(), endpoint.into());
    }

    pub fn endpoint_for(&self, party: &str) -> Option<&str> {
        self.by_party
            .get(party)
            .or(self.fallback.as_ref())
            .map(String::as_str)
    }
}

/// Posts replies through the sender's transient-retry loop.
pub struct TransportReplyDispatcher {
    sender: Arc<ReliableSender>,
    routes: ReplyRoutes,
}

impl TransportReplyDispatcher {
    pub fn new(sender: Arc<ReliableSender>, routes: ReplyRoutes) -> Self {
        Self { sender, routes }
    }
}

#[async_trait]
impl ReplyDispatcher for TransportReplyDispatcher {
    async fn dispatch(&self, reply: &EbxmlEnvelope) -> Result<(), DeliveryError> {
        let endpoint = self
            .routes
            .endpoint_for(&reply.to_party)
            .ok_or_else(|| DeliveryError::NoRoute(reply.to_party.clone()))?;
        let report = self.sender.hand_off(endpoint, reply).await?;
        debug!(
            message_id = %report.message_id,
            to = %reply.to_party,
            attempts = report.attempts,
            "reply dispatched"
        );
        Ok(())
    }
}
