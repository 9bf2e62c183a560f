use courier_codec::envelope::FAULT_CODE_CLIENT;
use courier_codec::{CodecError, EbxmlEnvelope, MultipartBody};
use tracing::{debug, warn};

/// Outcome of checking an inbound exchange's manifest against its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestVerification {
    /// Every manifest reference resolved; carries the parsed envelope.
    Verified(EbxmlEnvelope),
    /// Client fault envelope to return synchronously to the sender.
    Fault(EbxmlEnvelope),
}

/// Verifies that part 0 is an envelope whose manifest references all resolve
/// to parts of `body`.
///
/// Manifest problems are protocol responses and come back as
/// [`ManifestVerification::Fault`]; `Err` means there is no usable envelope
/// to derive a fault from.
pub fn verify_manifest(body: &MultipartBody) -> Result<ManifestVerification, CodecError> {
    let head = body
        .parts
        .first()
        .ok_or_else(|| CodecError::MalformedMultipart("no envelope part".into()))?;
    let envelope = EbxmlEnvelope::parse(&head.body_text()?)?;

    for reference in &envelope.manifest_references {
        let Some(content_id) = reference.content_id() else {
            warn!(href = %reference.href, "manifest reference is not a cid reference");
            return Ok(ManifestVerification::Fault(envelope.generate_soap_fault(
                FAULT_CODE_CLIENT,
                &format!("manifest reference {} is not a cid: reference", reference.href),
            )));
        };
        let present = body.parts.iter().any(|part| {
            part.content_id
                .as_ref()
                .is_some_and(|id| id.logical() == content_id.logical())
        });
        if !present {
            warn!(href = %reference.href, "manifest reference has no matching part");
            return Ok(ManifestVerification::Fault(envelope.generate_soap_fault(
                FAULT_CODE_CLIENT,
                &format!("manifest reference {} has no matching part", reference.href),
            )));
        }
    }

    debug!(
        message_id = %envelope.message_data.message_id,
        references = envelope.manifest_references.len(),
        "manifest verified"
    );
    Ok(ManifestVerification::Verified(envelope))
}

#[cfg(test)]
mod tests {
    use courier_codec::envelope::FAULT_CODE_CLIENT;
    use courier_codec::{CodecError, ContentId, EbxmlEnvelope, MultipartBody, Part};

    use super::{verify_manifest, ManifestVerification};

    fn envelope_with_refs(hrefs: &[&str]) -> EbxmlEnvelope {
        let mut envelope = EbxmlEnvelope::builder()
            .from_party("A")
            .to_party("B")
            .cpa_id("CPA")
            .conversation_id("C")
            .service("urn:svc")
            .action("Act")
            .message_id("M1")
            .build()
            .expect("envelope builds");
        // Bypass the cid check so malformed hrefs reach the wire.
        for href in hrefs {
            envelope
                .manifest_references
                .push(courier_codec::ManifestReference {
                    href: href.to_string(),
                    is_hl7: false,
                    description: None,
                });
        }
        envelope
    }

    fn body_with(envelope: &EbxmlEnvelope, payload_ids: &[&str]) -> MultipartBody {
        let mut body = MultipartBody::new();
        body.push_part(
            Part::new("text/xml", envelope.render())
                .with_content_id(ContentId::from_logical("header@x")),
        );
        for id in payload_ids {
            body.push_part(
                Part::new("application/xml", "<doc/>").with_content_id(ContentId::from_logical(id)),
            );
        }
        body
    }

    #[test]
    fn all_references_present_verifies() {
        let envelope = envelope_with_refs(&["cid:A", "CID:B"]);
        let body = body_with(&envelope, &["A", "B"]);

        let ManifestVerification::Verified(verified) =
            verify_manifest(&body).expect("verification runs")
        else {
            panic!("expected verified manifest");
        };
        assert_eq!(verified, envelope);
    }

    #[test]
    fn missing_part_yields_client_fault() {
        let envelope = envelope_with_refs(&["cid:A", "cid:B"]);
        let body = body_with(&envelope, &["A"]);
        let snapshot = body.clone();

        let ManifestVerification::Fault(fault) = verify_manifest(&body).expect("no error")
        else {
            panic!("expected fault");
        };
        let error = fault.error.expect("fault has error info");
        assert_eq!(error.code, FAULT_CODE_CLIENT);
        assert!(error.description.contains("cid:B"));
        assert_eq!(fault.message_data.ref_to_message_id.as_deref(), Some("M1"));
        assert_eq!(body, snapshot);
    }

    #[test]
    fn non_cid_reference_yields_client_fault() {
        let envelope = envelope_with_refs(&["http://elsewhere/doc"]);
        let body = body_with(&envelope, &[]);

        let outcome = verify_manifest(&body).expect("no error");
        assert!(matches!(outcome, ManifestVerification::Fault(f) if f.is_soap_fault()));
    }

    #[test]
    fn missing_envelope_is_an_error() {
        let err = verify_manifest(&MultipartBody::new()).expect_err("empty body");
        assert!(matches!(err, CodecError::MalformedMultipart(_)));
    }
}
