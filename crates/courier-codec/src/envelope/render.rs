use std::fmt::Write;

use quick_xml::escape::escape;

use super::{EbxmlEnvelope, EnvelopeKind};

/// Wire format of `eb:Timestamp`; always whole seconds, no zone suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const NS_SOAP: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const NS_EB: &str = "http://www.oasis-open.org/committees/ebxml-msg/schema/msg-header-2_0.xsd";
const NS_HL7: &str = "urn:hl7-org:transport/ebxml/DSTUv1.0";
const NS_XLINK: &str = "http://www.w3.org/1999/xlink";
const TO_PARTY_ACTOR: &str = "urn:oasis:names:tc:ebxml-msg:actor:toPartyMSH";

pub(super) fn render_envelope(envelope: &EbxmlEnvelope) -> String {
    let mut out = String::with_capacity(2048);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<soap:Envelope xmlns:soap=\"{NS_SOAP}\" xmlns:eb=\"{NS_EB}\" \
         xmlns:hl7ebxml=\"{NS_HL7}\" xmlns:xlink=\"{NS_XLINK}\">"
    );
    out.push_str("<soap:Header>\n");
    render_message_header(&mut out, envelope);
    if envelope.is_acknowledgment() {
        render_acknowledgment(&mut out, envelope);
    }
    render_error_list(&mut out, envelope);
    if envelope.ack_requested {
        let _ = writeln!(
            out,
            "<eb:AckRequested eb:version=\"2.0\" soap:mustUnderstand=\"1\" \
             soap:actor=\"{TO_PARTY_ACTOR}\" eb:signed=\"false\"/>"
        );
    }
    out.push_str("</soap:Header>\n");
    out.push_str("<soap:Body>\n");
    render_fault(&mut out, envelope);
    render_manifest(&mut out, envelope);
    out.push_str("</soap:Body>\n");
    out.push_str("</soap:Envelope>\n");
    out
}

fn render_message_header(out: &mut String, envelope: &EbxmlEnvelope) {
    out.push_str("<eb:MessageHeader eb:version=\"2.0\" soap:mustUnderstand=\"1\">\n");
    render_party(out, "From", &envelope.from_party, envelope.from_party_type.as_deref());
    render_party(out, "To", &envelope.to_party, envelope.to_party_type.as_deref());
    element(out, "eb:CPAId", &envelope.cpa_id);
    element(out, "eb:ConversationId", &envelope.conversation_id);
    element(out, "eb:Service", &envelope.service);
    element(out, "eb:Action", &envelope.action);

    let data = &envelope.message_data;
    out.push_str("<eb:MessageData>\n");
    element(out, "eb:MessageId", &data.message_id);
    if let Some(timestamp) = data.timestamp {
        element(out, "eb:Timestamp", &timestamp.format(TIMESTAMP_FORMAT).to_string());
    }
    if let Some(reference) = &data.ref_to_message_id {
        element(out, "eb:RefToMessageId", reference);
    }
    out.push_str("</eb:MessageData>\n");
    if envelope.duplicate_elimination {
        out.push_str("<eb:DuplicateElimination/>\n");
    }
    out.push_str("</eb:MessageHeader>\n");
}

fn render_party(out: &mut String, role: &str, party: &str, party_type: Option<&str>) {
    let _ = write!(out, "<eb:{role}><eb:PartyId");
    if let Some(party_type) = party_type {
        let _ = write!(out, " eb:type=\"{}\"", escape(party_type));
    }
    let _ = writeln!(out, ">{}</eb:PartyId></eb:{role}>", escape(party));
}

fn render_acknowledgment(out: &mut String, envelope: &EbxmlEnvelope) {
    let _ = writeln!(
        out,
        "<eb:Acknowledgment eb:version=\"2.0\" soap:mustUnderstand=\"1\" soap:actor=\"{TO_PARTY_ACTOR}\">"
    );
    if let Some(timestamp) = envelope.message_data.timestamp {
        element(out, "eb:Timestamp", &timestamp.format(TIMESTAMP_FORMAT).to_string());
    }
    if let Some(reference) = &envelope.message_data.ref_to_message_id {
        element(out, "eb:RefToMessageId", reference);
    }
    out.push_str("</eb:Acknowledgment>\n");
}

fn render_error_list(out: &mut String, envelope: &EbxmlEnvelope) {
    let Some(error) = &envelope.error else {
        return;
    };
    out.push_str("<eb:ErrorList");
    optional_attr(out, "eb:id", &error.list_id);
    let _ = writeln!(
        out,
        " eb:highestSeverity=\"{}\" eb:version=\"2.0\" soap:mustUnderstand=\"1\">",
        escape(&error.severity)
    );
    out.push_str("<eb:Error");
    optional_attr(out, "eb:id", &error.id);
    let _ = write!(out, " eb:errorCode=\"{}\"", escape(&error.code));
    optional_attr(out, "eb:codeContext", &error.code_context);
    let _ = writeln!(out, " eb:severity=\"{}\">", escape(&error.severity));
    if !error.description.is_empty() {
        let _ = writeln!(
            out,
            "<eb:Description xml:lang=\"en-GB\">{}</eb:Description>",
            escape(&error.description)
        );
    }
    out.push_str("</eb:Error>\n");
    out.push_str("</eb:ErrorList>\n");
}

fn render_fault(out: &mut String, envelope: &EbxmlEnvelope) {
    if envelope.kind() != EnvelopeKind::SoapFault {
        return;
    }
    let Some(error) = &envelope.error else {
        return;
    };
    out.push_str("<soap:Fault>\n");
    element(out, "faultcode", &error.code);
    element(out, "faultstring", &error.description);
    out.push_str("</soap:Fault>\n");
}

fn render_manifest(out: &mut String, envelope: &EbxmlEnvelope) {
    if envelope.manifest_references.is_empty() {
        return;
    }
    out.push_str("<eb:Manifest eb:version=\"2.0\">\n");
    for reference in &envelope.manifest_references {
        let _ = writeln!(out, "<eb:Reference xlink:href=\"{}\">", escape(&reference.href));
        if let Some(description) = &reference.description {
            let _ = writeln!(
                out,
                "<eb:Description xml:lang=\"en\">{}</eb:Description>",
                escape(description)
            );
        }
        if reference.is_hl7 {
            out.push_str(
                "<hl7ebxml:Payload style=\"HL7\" encoding=\"XML\" version=\"3.0\"/>\n",
            );
        }
        out.push_str("</eb:Reference>\n");
    }
    out.push_str("</eb:Manifest>\n");
}

fn element(out: &mut String, name: &str, text: &str) {
    let _ = writeln!(out, "<{name}>{}</{name}>", escape(text));
}

fn optional_attr(out: &mut String, name: &str, value: &str) {
    if !value.is_empty() {
        let _ = write!(out, " {name}=\"{}\"", escape(value));
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::envelope::{EbxmlEnvelope, FAULT_CODE_CLIENT};

    fn sample() -> EbxmlEnvelope {
        let timestamp = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 5))
            .expect("valid date");
        let mut envelope = EbxmlEnvelope::builder()
            .from_party("A & B")
            .to_party("C")
            .cpa_id("CPA")
            .conversation_id("CONV")
            .service("urn:svc")
            .action("Act")
            .message_id("M1")
            .timestamp(timestamp)
            .duplicate_elimination(true)
            .ack_requested(true)
            .build()
            .expect("sample builds");
        envelope
            .add_manifest_reference("cid:p1@x", true, Some("<doc>".into()))
            .expect("cid ref");
        envelope
    }

    #[test]
    fn render_escapes_and_formats_timestamp() {
        let xml = sample().render();
        assert!(xml.contains("A &amp; B"));
        assert!(xml.contains("&lt;doc&gt;"));
        assert!(xml.contains("<eb:Timestamp>2024-03-01T12:00:05</eb:Timestamp>"));
        assert!(xml.contains("<eb:DuplicateElimination/>"));
        assert!(xml.contains("<eb:AckRequested"));
        assert!(!xml.contains("<eb:Acknowledgment"));
    }

    #[test]
    fn render_is_deterministic_and_parses_back() {
        let envelope = sample();
        assert_eq!(envelope.render(), envelope.render());
        let parsed = EbxmlEnvelope::parse(&envelope.render()).expect("rendered xml parses");
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn fault_renders_error_list_and_soap_fault() {
        let fault = sample().generate_soap_fault(FAULT_CODE_CLIENT, "bad manifest");
        let xml = fault.render();
        assert!(xml.contains("eb:errorCode=\"soap:Client\""));
        assert!(xml.contains("<faultcode>soap:Client</faultcode>"));
        assert!(xml.contains("<faultstring>bad manifest</faultstring>"));
        assert!(!xml.contains("eb:codeContext"));

        let parsed = EbxmlEnvelope::parse(&xml).expect("fault parses");
        assert!(parsed.is_soap_fault());
        assert_eq!(parsed.error, fault.error);
    }
}
