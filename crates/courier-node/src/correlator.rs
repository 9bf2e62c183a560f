use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use courier_codec::{EbxmlEnvelope, EnvelopeKind};
use tokio::sync::oneshot;
use tracing::debug;

/// Asynchronous reply correlated to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncReply {
    Ack,
    /// SOAP fault; permanent.
    Fault { code: String, description: String },
    /// Acknowledged, but the peer could not deliver to its application.
    DeliveryFailure { description: String },
    /// Any other correlated envelope.
    Other { action: String },
}

impl AsyncReply {
    pub fn from_envelope(envelope: &EbxmlEnvelope) -> Self {
        let error = envelope.error.clone().unwrap_or_default();
        match envelope.kind() {
            EnvelopeKind::Acknowledgment => AsyncReply::Ack,
            EnvelopeKind::DeliveryFailure => AsyncReply::DeliveryFailure {
                description: error.description,
            },
            EnvelopeKind::SoapFault => AsyncReply::Fault {
                code: error.code,
                description: error.description,
            },
            EnvelopeKind::Manifest => AsyncReply::Other {
                action: envelope.action.clone(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Waiters {
    next_generation: u64,
    by_message_id: HashMap<String, (u64, oneshot::Sender<AsyncReply>)>,
}

/// Routes inbound replies to the sender awaiting them, keyed by message id.
///
/// Cloning shares the underlying registry.
#[derive(Debug, Clone, Default)]
pub struct AckCorrelator {
    waiters: Arc<Mutex<Waiters>>,
}

impl AckCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in the reply to `message_id`.
    ///
    /// A later registration for the same id replaces the earlier one. The
    /// registration is removed when the returned handle is dropped.
    pub fn register(&self, message_id: &str) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.lock();
        waiters.next_generation += 1;
        let generation = waiters.next_generation;
        waiters
            .by_message_id
            .insert(message_id.to_string(), (generation, tx));
        PendingReply {
            message_id: message_id.to_string(),
            generation,
            rx,
            waiters: Arc::clone(&self.waiters),
        }
    }

    /// Hands `reply` to whoever awaits `message_id`. Returns false when
    /// nobody is waiting.
    pub fn deliver(&self, message_id: &str, reply: AsyncReply) -> bool {
        let waiter = self.lock().by_message_id.remove(message_id);
        match waiter {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => {
                debug!(message_id, "uncorrelated reply dropped");
                false
            }
        }
    }

    /// Correlates an inbound reply envelope by its `RefToMessageId`.
    pub fn resolve(&self, envelope: &EbxmlEnvelope) -> bool {
        match envelope.message_data.ref_to_message_id.as_deref() {
            Some(reference) => self.deliver(reference, AsyncReply::from_envelope(envelope)),
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().by_message_id.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registration handle returned by [`AckCorrelator::register`].
#[derive(Debug)]
pub struct PendingReply {
    message_id: String,
    generation: u64,
    rx: oneshot::Receiver<AsyncReply>,
    waiters: Arc<Mutex<Waiters>>,
}

impl PendingReply {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Waits for the reply; `None` if the registration was superseded.
    pub async fn recv(&mut self) -> Option<AsyncReply> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        let ours = waiters
            .by_message_id
            .get(&self.message_id)
            .is_some_and(|(generation, _)| *generation == self.generation);
        if ours {
            waiters.by_message_id.remove(&self.message_id);
        }
    }
}
