use std::sync::Arc;

use courier_codec::{CodecError, EbxmlEnvelope, MultipartBody};
use tracing::{debug, error, info, warn};

use crate::correlator::AckCorrelator;
use crate::ledger::{ClaimOutcome, DeliveryLedger};
use crate::publish::{DeliveredPayload, PayloadPublisher};
use crate::reply::ReplyDispatcher;
use crate::verify::{verify_manifest, ManifestVerification};

/// HTTP status returned with a synchronous fault body.
pub const FAULT_STATUS: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Received,
    Verifying,
    FaultResponded,
    SyncAcked,
    Publishing,
    AckSent,
    FailureNotified,
    /// Another worker is publishing the same message id; nothing was done.
    InFlightElsewhere,
}

/// Verified exchange awaiting the asynchronous publish leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedExchange {
    pub envelope: EbxmlEnvelope,
    pub body: MultipartBody,
}

/// Result of the synchronous leg.
#[derive(Debug)]
pub enum Acceptance {
    /// Respond 200 with an empty body, then run [`ReliableReceiver::complete`].
    Accepted(VerifiedExchange),
    /// Respond [`FAULT_STATUS`] with the rendered fault; terminal.
    Fault(EbxmlEnvelope),
    /// Inbound acknowledgment or fault for one of our own messages.
    Reply { correlated: bool },
    /// The bytes were not a usable exchange.
    Malformed(CodecError),
}

/// Receiver half of the reliable delivery state machine.
pub struct ReliableReceiver {
    ledger: Arc<dyn DeliveryLedger>,
    publisher: Arc<dyn PayloadPublisher>,
    replies: Arc<dyn ReplyDispatcher>,
    correlator: AckCorrelator,
}

impl ReliableReceiver {
    pub fn new(
        ledger: Arc<dyn DeliveryLedger>,
        publisher: Arc<dyn PayloadPublisher>,
        replies: Arc<dyn ReplyDispatcher>,
        correlator: AckCorrelator,
    ) -> Self {
        Self {
            ledger,
            publisher,
            replies,
            correlator,
        }
    }

    /// Synchronous leg: parse, verify the manifest and decide the response.
    pub fn accept(&self, content_type: &str, bytes: &[u8]) -> Acceptance {
        debug!(state = ?ReceiverState::Received, len = bytes.len(), "inbound exchange");
        let body = match MultipartBody::parse(bytes, content_type) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "inbound multipart rejected");
                return Acceptance::Malformed(err);
            }
        };

        debug!(state = ?ReceiverState::Verifying, parts = body.parts.len(), "verifying manifest");
        let envelope = match verify_manifest(&body) {
            Ok(ManifestVerification::Verified(envelope)) => envelope,
            Ok(ManifestVerification::Fault(fault)) => {
                debug!(state = ?ReceiverState::FaultResponded, "responding with fault");
                return Acceptance::Fault(fault);
            }
            Err(err) => {
                warn!(error = %err, "inbound envelope rejected");
                return Acceptance::Malformed(err);
            }
        };

        if envelope.is_acknowledgment() || envelope.is_soap_fault() {
            let correlated = self.correlator.resolve(&envelope);
            debug!(
                kind = ?envelope.kind(),
                ref_to = ?envelope.message_data.ref_to_message_id,
                correlated,
                "inbound reply"
            );
            return Acceptance::Reply { correlated };
        }

        debug!(
            state = ?ReceiverState::SyncAcked,
            message_id = %envelope.message_data.message_id,
            "exchange accepted"
        );
        Acceptance::Accepted(VerifiedExchange { envelope, body })
    }

    /// Asynchronous leg: publish at most once per message id, then emit an
    /// acknowledgment or a delivery-failure notification.
    pub async fn complete(&self, exchange: VerifiedExchange) -> ReceiverState {
        let VerifiedExchange { envelope, body } = exchange;
        let message_id = envelope.message_data.message_id.clone();
        debug!(state = ?ReceiverState::Publishing, %message_id, "publishing");

        let reply = match self.ledger.claim(&message_id).await {
            Ok(ClaimOutcome::InProgress) => {
                info!(%message_id, "delivery already in progress elsewhere");
                return ReceiverState::InFlightElsewhere;
            }
            Ok(ClaimOutcome::AlreadyDelivered) => {
                info!(%message_id, "duplicate delivery suppressed");
                envelope.generate_acknowledgment()
            }
            Ok(ClaimOutcome::Claimed) => {
                let parts = body.parts.into_iter().skip(1).collect();
                let payload = DeliveredPayload::from_exchange(&envelope, parts);
                match self.publisher.publish(payload).await {
                    Ok(()) => {
                        if let Err(err) = self.ledger.confirm(&message_id).await {
                            error!(%message_id, error = %err, "ledger confirm failed");
                        }
                        info!(%message_id, "payload published");
                        envelope.generate_acknowledgment()
                    }
                    Err(err) => {
                        warn!(%message_id, error = %err, "publish failed");
                        if let Err(err) = self.ledger.release(&message_id).await {
                            error!(%message_id, error = %err, "ledger release failed");
                        }
                        envelope.generate_delivery_failure_notification(&err.to_string())
                    }
                }
            }
            Err(err) => {
                error!(%message_id, error = %err, "ledger claim failed");
                envelope.generate_delivery_failure_notification(&err.to_string())
            }
        };

        let state = if reply.is_delivery_failure() {
            ReceiverState::FailureNotified
        } else {
            ReceiverState::AckSent
        };
        if let Err(err) = self.replies.dispatch(&reply).await {
            warn!(%message_id, error = %err, "reply dispatch failed");
        }
        debug!(?state, %message_id, "exchange complete");
        state
    }
}
