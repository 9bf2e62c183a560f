use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use courier_codec::envelope::FAULT_CODE_CLIENT;
use courier_codec::{CodecError, ContentId, EbxmlEnvelope, MultipartBody, Part};
use courier_transport::{Transport, TransportResponse};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::correlator::{AckCorrelator, AsyncReply, PendingReply};
use crate::error::DeliveryError;

/// Marker in a synchronous response body that rejects the exchange for good.
pub const REJECTED_MARKER: &str = "rejected";
/// Content id given to the envelope part of outbound exchanges.
pub const ENVELOPE_CONTENT_ID: &str = "ebXMLHeader@courier";

/// Ack-timeout and retry parameters for outbound exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub ack_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        crate::config::DeliveryConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Sending,
    AwaitingAck,
    Acked,
    NackedPermanent,
    Retry,
    Failed,
}

/// Record of one outbound exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub message_id: String,
    pub attempts: u32,
    pub transitions: Vec<SenderState>,
}

impl SendReport {
    fn new(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            attempts: 0,
            transitions: Vec::new(),
        }
    }

    fn enter(&mut self, state: SenderState) {
        debug!(message_id = %self.message_id, attempt = self.attempts, ?state, "sender transition");
        self.transitions.push(state);
    }

    pub fn final_state(&self) -> Option<SenderState> {
        self.transitions.last().copied()
    }
}

/// Envelope plus payload parts addressed to an endpoint.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub endpoint: String,
    pub envelope: EbxmlEnvelope,
    pub payloads: Vec<Part>,
}

/// Assembles the multipart exchange: the envelope as part 0, then payloads.
///
/// Every manifest reference must resolve to one of `payloads`.
pub fn build_exchange(
    envelope: &EbxmlEnvelope,
    payloads: Vec<Part>,
) -> Result<MultipartBody, CodecError> {
    envelope.validate()?;
    for reference in &envelope.manifest_references {
        let target = reference.content_id();
        let present = payloads.iter().any(|part| {
            match (part.content_id.as_ref(), target.as_ref()) {
                (Some(id), Some(target)) => id.logical() == target.logical(),
                _ => false,
            }
        });
        if !present {
            return Err(CodecError::InvalidManifestReference(reference.href.clone()));
        }
    }

    let header_id = ContentId::from_logical(ENVELOPE_CONTENT_ID);
    let mut body = MultipartBody::new();
    body.start = Some(header_id.clone());
    body.push_part(
        Part::new("text/xml; charset=UTF-8", envelope.render()).with_content_id(header_id),
    );
    for part in payloads {
        body.push_part(part);
    }
    Ok(body)
}

enum SyncOutcome {
    HandedOff,
    Rejected(String),
    Transient(String),
}

fn classify(response: &TransportResponse) -> SyncOutcome {
    if !response.is_success() && response.body.to_ascii_lowercase().contains(REJECTED_MARKER) {
        return SyncOutcome::Rejected(format!("http {} rejected", response.status));
    }
    if let Ok(reply) = EbxmlEnvelope::parse(&response.body) {
        let client_fault = reply.is_soap_fault()
            && reply
                .error
                .as_ref()
                .is_some_and(|e| is_client_code(&e.code));
        if client_fault {
            let description = reply.error.map(|e| e.description).unwrap_or_default();
            return SyncOutcome::Rejected(format!("client fault: {description}"));
        }
    }
    if response.is_success() {
        SyncOutcome::HandedOff
    } else if response.is_client_error() {
        SyncOutcome::Rejected(format!("http {}", response.status))
    } else {
        SyncOutcome::Transient(format!("http {}", response.status))
    }
}

fn is_client_code(code: &str) -> bool {
    let suffix = |c: &str| c.rsplit(':').next().unwrap_or(c).to_ascii_lowercase();
    suffix(code) == suffix(FAULT_CODE_CLIENT)
}

/// Sender half of the reliable delivery state machine.
pub struct ReliableSender {
    transport: Arc<dyn Transport>,
    correlator: AckCorrelator,
    policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl ReliableSender {
    pub fn new(
        transport: Arc<dyn Transport>,
        correlator: AckCorrelator,
        policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            correlator,
            policy,
            shutdown,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Sends `message` and waits for its correlated acknowledgment, retrying
    /// transient failures and ack timeouts with the same message id.
    pub async fn send(&self, message: &OutboundMessage) -> Result<SendReport, DeliveryError> {
        let body = build_exchange(&message.envelope, message.payloads.clone())?;
        let message_id = message.envelope.message_data.message_id.clone();
        self.run(&message.endpoint, &message_id, &body, true).await
    }

    /// Posts a reply exchange, retrying transient failures, without waiting
    /// for an acknowledgment.
    pub async fn hand_off(
        &self,
        endpoint: &str,
        envelope: &EbxmlEnvelope,
    ) -> Result<SendReport, DeliveryError> {
        let body = build_exchange(envelope, Vec::new())?;
        self.run(endpoint, &envelope.message_data.message_id, &body, false)
            .await
    }

    async fn run(
        &self,
        endpoint: &str,
        message_id: &str,
        body: &MultipartBody,
        await_ack: bool,
    ) -> Result<SendReport, DeliveryError> {
        let wire = Bytes::from(body.serialize());
        let content_type = body.content_type_header();
        let mut report = SendReport::new(message_id);
        let mut last_failure = String::new();

        for attempt in 1..=self.policy.max_attempts {
            report.attempts = attempt;
            report.enter(SenderState::Sending);
            // Registered before posting so a fast reply is not lost.
            let pending = await_ack.then(|| self.correlator.register(message_id));

            match self
                .transport
                .post(endpoint, &content_type, wire.clone())
                .await
            {
                Err(err) => {
                    warn!(message_id, attempt, error = %err, "transport failure");
                    last_failure = err.to_string();
                }
                Ok(response) => match classify(&response) {
                    SyncOutcome::Rejected(reason) => {
                        report.enter(SenderState::NackedPermanent);
                        warn!(message_id, %reason, "exchange rejected");
                        return Err(DeliveryError::PermanentRejection {
                            message_id: message_id.to_string(),
                            reason,
                        });
                    }
                    SyncOutcome::Transient(reason) => {
                        warn!(message_id, attempt, %reason, "transient rejection");
                        last_failure = reason;
                    }
                    SyncOutcome::HandedOff => {
                        let Some(pending) = pending else {
                            info!(message_id, attempt, "reply handed off");
                            return Ok(report);
                        };
                        report.enter(SenderState::AwaitingAck);
                        match self.await_reply(pending).await? {
                            Some(AsyncReply::Ack) => {
                                report.enter(SenderState::Acked);
                                info!(message_id, attempt, "exchange acknowledged");
                                return Ok(report);
                            }
                            Some(AsyncReply::Fault { code, description }) => {
                                report.enter(SenderState::NackedPermanent);
                                warn!(message_id, %code, %description, "exchange faulted");
                                return Err(DeliveryError::Nacked {
                                    message_id: message_id.to_string(),
                                    code,
                                    description,
                                });
                            }
                            Some(AsyncReply::DeliveryFailure { description }) => {
                                last_failure = format!("delivery failure: {description}");
                            }
                            Some(AsyncReply::Other { action }) => {
                                last_failure = format!("unexpected reply {action}");
                            }
                            None => {
                                last_failure = format!(
                                    "no acknowledgment within {:?}",
                                    self.policy.ack_timeout
                                );
                            }
                        }
                        warn!(message_id, attempt, reason = %last_failure, "awaiting ack failed");
                    }
                },
            }

            if attempt < self.policy.max_attempts {
                report.enter(SenderState::Retry);
                self.sleep_or_cancel(self.policy.backoff_for(attempt)).await?;
            }
        }

        report.enter(SenderState::Failed);
        warn!(message_id, attempts = report.attempts, "exchange failed");
        Err(DeliveryError::Exhausted {
            message_id: message_id.to_string(),
            attempts: report.attempts,
            last: last_failure,
        })
    }

    /// `Ok(None)` on ack timeout.
    async fn await_reply(
        &self,
        mut pending: PendingReply,
    ) -> Result<Option<AsyncReply>, DeliveryError> {
        tokio::select! {
            reply = tokio::time::timeout(self.policy.ack_timeout, pending.recv()) => {
                Ok(reply.ok().flatten())
            }
            _ = cancelled(self.shutdown.clone()) => Err(DeliveryError::Cancelled),
        }
    }

    async fn sleep_or_cancel(&self, delay: Duration) -> Result<(), DeliveryError> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancelled(self.shutdown.clone()) => Err(DeliveryError::Cancelled),
        }
    }
}

/// Resolves once shutdown is signalled; never if the signal source is gone.
async fn cancelled(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
