//! ebXML message envelope model.
//!
//! The envelope is the part-0 XML document of every exchange. Replies
//! (acknowledgments, SOAP faults, delivery-failure notifications) are derived
//! copies of an inbound envelope with the parties swapped; derivation never
//! mutates the source envelope.

mod parse;
mod render;

use chrono::{Local, NaiveDateTime, Timelike};
use courier_core::RandomIdGenerator;

use crate::content_id::ContentId;
use crate::error::CodecError;

pub use parse::parse_timestamp;
pub use render::TIMESTAMP_FORMAT;

/// Base ebXML messaging service used by acknowledgments and errors.
pub const SERVICE_EBXML: &str = "urn:oasis:names:tc:ebxml-msg:service";
pub const ACTION_ACKNOWLEDGMENT: &str = "Acknowledgment";
pub const ACTION_MESSAGE_ERROR: &str = "MessageError";
/// ebXML error code carried by delivery-failure notifications.
pub const ERROR_CODE_DELIVERY_FAILURE: &str = "DeliveryFailure";
pub const ERROR_CODE_CONTEXT: &str = "urn:oasis:names:tc:ebxml-msg:service:errors";
/// SOAP fault code for messages rejected as structurally invalid.
pub const FAULT_CODE_CLIENT: &str = "soap:Client";
pub const FAULT_CODE_SERVER: &str = "soap:Server";
pub const SEVERITY_ERROR: &str = "Error";
/// Party id type written when an envelope is built without one.
pub const PARTY_TYPE_DEFAULT: &str = "urn:nhs:names:partyType:ocs+serviceInstance";

/// Message identity block of the envelope header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageData {
    pub message_id: String,
    pub timestamp: Option<NaiveDateTime>,
    pub ref_to_message_id: Option<String>,
}

/// Single `eb:Error` entry of an `eb:ErrorList`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    pub list_id: String,
    pub id: String,
    pub code: String,
    pub code_context: String,
    pub description: String,
    pub severity: String,
    /// Set on acknowledgments reporting that application delivery failed.
    pub delivery_failure: bool,
}

/// Manifest entry pointing at a payload part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestReference {
    /// `cid:` reference to the part's content id.
    pub href: String,
    pub is_hl7: bool,
    pub description: Option<String>,
}

impl ManifestReference {
    /// Content id targeted by `href`, if it is a `cid:` reference.
    pub fn content_id(&self) -> Option<ContentId> {
        ContentId::from_cid_href(&self.href)
    }
}

/// Which of the mutually exclusive envelope semantics applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Acknowledgment,
    /// Acknowledgment whose application delivery failed.
    DeliveryFailure,
    SoapFault,
    /// Regular message carrying (or describing) payload parts.
    Manifest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EbxmlEnvelope {
    pub from_party: String,
    pub from_party_type: Option<String>,
    pub to_party: String,
    pub to_party_type: Option<String>,
    pub cpa_id: String,
    pub conversation_id: String,
    pub service: String,
    pub action: String,
    pub message_data: MessageData,
    pub error: Option<ErrorInfo>,
    pub manifest_references: Vec<ManifestReference>,
    pub duplicate_elimination: bool,
    pub ack_requested: bool,
}

impl EbxmlEnvelope {
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }

    /// Parses envelope XML; unknown elements are ignored.
    pub fn parse(xml: &str) -> Result<Self, CodecError> {
        parse::parse_envelope(xml)
    }

    /// Parses envelope XML from raw bytes (must be UTF-8).
    pub fn parse_bytes(xml: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(xml)
            .map_err(|e| CodecError::MalformedEnvelope(format!("envelope is not UTF-8: {e}")))?;
        Self::parse(text)
    }

    /// Renders the envelope as XML text; output is deterministic.
    pub fn render(&self) -> String {
        render::render_envelope(self)
    }

    pub fn kind(&self) -> EnvelopeKind {
        if self.action == ACTION_MESSAGE_ERROR {
            EnvelopeKind::SoapFault
        } else if self.action == ACTION_ACKNOWLEDGMENT {
            if self.error.as_ref().is_some_and(|e| e.delivery_failure) {
                EnvelopeKind::DeliveryFailure
            } else {
                EnvelopeKind::Acknowledgment
            }
        } else {
            EnvelopeKind::Manifest
        }
    }

    /// True for plain acknowledgments and delivery-failure notifications.
    pub fn is_acknowledgment(&self) -> bool {
        matches!(
            self.kind(),
            EnvelopeKind::Acknowledgment | EnvelopeKind::DeliveryFailure
        )
    }

    pub fn is_delivery_failure(&self) -> bool {
        self.kind() == EnvelopeKind::DeliveryFailure
    }

    pub fn is_soap_fault(&self) -> bool {
        self.kind() == EnvelopeKind::SoapFault
    }

    pub fn is_manifest(&self) -> bool {
        self.kind() == EnvelopeKind::Manifest
    }

    /// Checks that every field required on the wire is populated and that
    /// manifest references use the `cid:` scheme.
    pub fn validate(&self) -> Result<(), CodecError> {
        self.check_required()?;
        for reference in &self.manifest_references {
            if reference.content_id().is_none() {
                return Err(CodecError::InvalidManifestReference(
                    reference.href.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Required header fields only; manifest hrefs are left to the verifier.
    pub(crate) fn check_required(&self) -> Result<(), CodecError> {
        let required = [
            ("From/PartyId", self.from_party.as_str()),
            ("To/PartyId", self.to_party.as_str()),
            ("CPAId", self.cpa_id.as_str()),
            ("ConversationId", self.conversation_id.as_str()),
            ("Service", self.service.as_str()),
            ("Action", self.action.as_str()),
            ("MessageData/MessageId", self.message_data.message_id.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(CodecError::MalformedEnvelope(format!("missing {name}")));
            }
        }
        if self.message_data.timestamp.is_none() {
            return Err(CodecError::MalformedEnvelope(
                "missing MessageData/Timestamp".into(),
            ));
        }
        Ok(())
    }

    /// Appends a manifest entry; `href` must be a `cid:` reference.
    pub fn add_manifest_reference(
        &mut self,
        href: impl Into<String>,
        is_hl7: bool,
        description: Option<String>,
    ) -> Result<(), CodecError> {
        let href = href.into();
        if ContentId::from_cid_href(&href).is_none() {
            return Err(CodecError::InvalidManifestReference(href));
        }
        self.manifest_references.push(ManifestReference {
            href,
            is_hl7,
            description,
        });
        Ok(())
    }

    /// Positive acknowledgment of this envelope.
    pub fn generate_acknowledgment(&self) -> Self {
        self.derive_reply(ACTION_ACKNOWLEDGMENT)
    }

    /// SOAP fault reply rejecting this envelope.
    pub fn generate_soap_fault(&self, code: &str, description: &str) -> Self {
        let mut fault = self.derive_reply(ACTION_MESSAGE_ERROR);
        fault.error = Some(ErrorInfo {
            code: code.to_string(),
            code_context: String::new(),
            description: description.to_string(),
            severity: SEVERITY_ERROR.to_string(),
            ..ErrorInfo::default()
        });
        fault
    }

    /// Acknowledgment reporting that the payload could not be delivered to
    /// the application.
    pub fn generate_delivery_failure_notification(&self, description: &str) -> Self {
        let mut notification = self.derive_reply(ACTION_ACKNOWLEDGMENT);
        notification.error = Some(ErrorInfo {
            code: ERROR_CODE_DELIVERY_FAILURE.to_string(),
            code_context: ERROR_CODE_CONTEXT.to_string(),
            description: description.to_string(),
            severity: SEVERITY_ERROR.to_string(),
            delivery_failure: true,
            ..ErrorInfo::default()
        });
        notification
    }

    fn derive_reply(&self, action: &str) -> Self {
        Self {
            from_party: self.to_party.clone(),
            from_party_type: self.to_party_type.clone(),
            to_party: self.from_party.clone(),
            to_party_type: self.from_party_type.clone(),
            cpa_id: self.cpa_id.clone(),
            conversation_id: self.conversation_id.clone(),
            service: SERVICE_EBXML.to_string(),
            action: action.to_string(),
            message_data: MessageData {
                message_id: RandomIdGenerator.next_id(),
                timestamp: Some(now_timestamp()),
                ref_to_message_id: Some(self.message_data.message_id.clone()),
            },
            error: None,
            manifest_references: Vec::new(),
            duplicate_elimination: false,
            ack_requested: false,
        }
    }
}

/// Current local time truncated to whole seconds, the wire precision.
pub fn now_timestamp() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Step-by-step construction of outbound envelopes.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeBuilder {
    envelope: EbxmlEnvelope,
}

impl EnvelopeBuilder {
    pub fn from_party(mut self, party: impl Into<String>) -> Self {
        self.envelope.from_party = party.into();
        self
    }

    pub fn to_party(mut self, party: impl Into<String>) -> Self {
        self.envelope.to_party = party.into();
        self
    }

    pub fn cpa_id(mut self, cpa_id: impl Into<String>) -> Self {
        self.envelope.cpa_id = cpa_id.into();
        self
    }

    pub fn conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.envelope.conversation_id = conversation_id.into();
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.envelope.service = service.into();
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.envelope.action = action.into();
        self
    }

    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.envelope.message_data.message_id = message_id.into();
        self
    }

    pub fn timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.envelope.message_data.timestamp = Some(timestamp);
        self
    }

    pub fn ref_to_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.envelope.message_data.ref_to_message_id = Some(message_id.into());
        self
    }

    pub fn duplicate_elimination(mut self, enabled: bool) -> Self {
        self.envelope.duplicate_elimination = enabled;
        self
    }

    pub fn ack_requested(mut self, enabled: bool) -> Self {
        self.envelope.ack_requested = enabled;
        self
    }

    /// Fills defaults (party types, timestamp) and validates.
    pub fn build(mut self) -> Result<EbxmlEnvelope, CodecError> {
        let envelope = &mut self.envelope;
        envelope
            .from_party_type
            .get_or_insert_with(|| PARTY_TYPE_DEFAULT.to_string());
        envelope
            .to_party_type
            .get_or_insert_with(|| PARTY_TYPE_DEFAULT.to_string());
        envelope.message_data.timestamp.get_or_insert_with(now_timestamp);
        self.envelope.validate()?;
        Ok(self.envelope)
    }
}
