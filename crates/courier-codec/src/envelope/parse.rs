use chrono::{DateTime, NaiveDateTime};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{EbxmlEnvelope, ErrorInfo, ManifestReference, ERROR_CODE_DELIVERY_FAILURE};
use crate::error::CodecError;

type Attrs = [(String, String)];

/// Element paths below the root `Envelope`, by local name. Rules fire on
/// element start (with attributes) or end (with the collected text).
const START_RULES: &[(&str, fn(&mut Draft, &Attrs))] = &[
    ("Header/MessageHeader/From/PartyId", |d, a| {
        d.envelope.from_party_type = attr(a, "type")
    }),
    ("Header/MessageHeader/To/PartyId", |d, a| {
        d.envelope.to_party_type = attr(a, "type")
    }),
    ("Header/MessageHeader/DuplicateElimination", |d, _| {
        d.envelope.duplicate_elimination = true
    }),
    ("Header/AckRequested", |d, _| d.envelope.ack_requested = true),
    ("Header/ErrorList", |d, a| {
        d.error_mut().list_id = attr(a, "id").unwrap_or_default()
    }),
    ("Header/ErrorList/Error", |d, a| {
        let error = d.error_mut();
        error.id = attr(a, "id").unwrap_or_default();
        error.code = attr(a, "errorCode").unwrap_or_default();
        error.code_context = attr(a, "codeContext").unwrap_or_default();
        error.severity = attr(a, "severity").unwrap_or_default();
    }),
    ("Body/Manifest/Reference", |d, a| {
        d.envelope.manifest_references.push(ManifestReference {
            href: attr(a, "href").unwrap_or_default(),
            ..ManifestReference::default()
        })
    }),
    ("Body/Manifest/Reference/Payload", |d, _| {
        if let Some(reference) = d.envelope.manifest_references.last_mut() {
            reference.is_hl7 = true;
        }
    }),
];

const TEXT_RULES: &[(&str, fn(&mut Draft, String))] = &[
    ("Header/MessageHeader/From/PartyId", |d, t| d.envelope.from_party = t),
    ("Header/MessageHeader/To/PartyId", |d, t| d.envelope.to_party = t),
    ("Header/MessageHeader/CPAId", |d, t| d.envelope.cpa_id = t),
    ("Header/MessageHeader/ConversationId", |d, t| {
        d.envelope.conversation_id = t
    }),
    ("Header/MessageHeader/Service", |d, t| d.envelope.service = t),
    ("Header/MessageHeader/Action", |d, t| d.envelope.action = t),
    ("Header/MessageHeader/MessageData/MessageId", |d, t| {
        d.envelope.message_data.message_id = t
    }),
    ("Header/MessageHeader/MessageData/Timestamp", |d, t| {
        d.timestamp = Some(t)
    }),
    ("Header/MessageHeader/MessageData/RefToMessageId", |d, t| {
        d.envelope.message_data.ref_to_message_id = Some(t)
    }),
    ("Header/ErrorList/Error/Description", |d, t| {
        d.error_mut().description = t
    }),
    ("Body/Manifest/Reference/Description", |d, t| {
        if let Some(reference) = d.envelope.manifest_references.last_mut() {
            reference.description = Some(t);
        }
    }),
    ("Body/Fault/faultcode", |d, t| d.fault_code = Some(t)),
    ("Body/Fault/faultstring", |d, t| d.fault_string = Some(t)),
];

#[derive(Default)]
struct Draft {
    envelope: EbxmlEnvelope,
    timestamp: Option<String>,
    fault_code: Option<String>,
    fault_string: Option<String>,
}

impl Draft {
    fn error_mut(&mut self) -> &mut ErrorInfo {
        self.envelope.error.get_or_insert_with(ErrorInfo::default)
    }

    fn finish(mut self) -> Result<EbxmlEnvelope, CodecError> {
        if let Some(raw) = self.timestamp.take() {
            let parsed = parse_timestamp(&raw).ok_or_else(|| {
                CodecError::MalformedEnvelope(format!("unparsable timestamp {raw:?}"))
            })?;
            self.envelope.message_data.timestamp = Some(parsed);
        }
        // A bare SOAP fault without an ebXML error list still reports its code.
        if self.envelope.error.is_none() {
            if let Some(code) = self.fault_code.take() {
                self.envelope.error = Some(ErrorInfo {
                    code,
                    description: self.fault_string.take().unwrap_or_default(),
                    ..ErrorInfo::default()
                });
            }
        }
        if let Some(error) = self.envelope.error.as_mut() {
            error.delivery_failure = error.code == ERROR_CODE_DELIVERY_FAILURE;
        }
        self.envelope.check_required()?;
        Ok(self.envelope)
    }
}

pub(super) fn parse_envelope(xml: &str) -> Result<EbxmlEnvelope, CodecError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut draft = Draft::default();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut saw_root = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            CodecError::MalformedEnvelope(format!(
                "xml error at byte {}: {e}",
                reader.buffer_position()
            ))
        })?;
        match event {
            Event::Start(start) => {
                open_element(&mut draft, &mut path, &mut saw_root, &start)?;
                text.clear();
            }
            Event::Empty(start) => {
                open_element(&mut draft, &mut path, &mut saw_root, &start)?;
                close_element(&mut draft, &mut path, String::new());
                text.clear();
            }
            Event::End(_) => {
                close_element(&mut draft, &mut path, std::mem::take(&mut text));
            }
            Event::Text(raw) => {
                let unescaped = raw
                    .unescape()
                    .map_err(|e| CodecError::MalformedEnvelope(format!("bad text: {e}")))?;
                text.push_str(&unescaped);
            }
            Event::CData(data) => {
                text.push_str(&String::from_utf8_lossy(&data.into_inner()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(CodecError::MalformedEnvelope("no Envelope element".into()));
    }
    draft.finish()
}

fn open_element(
    draft: &mut Draft,
    path: &mut Vec<String>,
    saw_root: &mut bool,
    start: &BytesStart<'_>,
) -> Result<(), CodecError> {
    let name = local_name(start.local_name().as_ref());
    if path.is_empty() {
        if *saw_root || name != "Envelope" {
            return Err(CodecError::MalformedEnvelope(format!(
                "unexpected root element {name}"
            )));
        }
        *saw_root = true;
    }
    path.push(name);

    let key = rule_path(path);
    if let Some((_, rule)) = START_RULES.iter().find(|(p, _)| *p == key) {
        let attrs = attributes(start)?;
        rule(draft, &attrs);
    }
    Ok(())
}

fn close_element(draft: &mut Draft, path: &mut Vec<String>, text: String) {
    let key = rule_path(path);
    if let Some((_, rule)) = TEXT_RULES.iter().find(|(p, _)| *p == key) {
        rule(draft, text.trim().to_string());
    }
    path.pop();
}

fn rule_path(path: &[String]) -> String {
    path.get(1..).map(|rest| rest.join("/")).unwrap_or_default()
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>, CodecError> {
    let mut out = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute
            .map_err(|e| CodecError::MalformedEnvelope(format!("bad attribute: {e}")))?;
        let value = attribute
            .unescape_value()
            .map_err(|e| CodecError::MalformedEnvelope(format!("bad attribute: {e}")))?;
        out.push((
            local_name(attribute.key.local_name().as_ref()),
            value.into_owned(),
        ));
    }
    Ok(out)
}

fn attr(attrs: &Attrs, name: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}

/// Parses a wire timestamp.
///
/// Accepts `2024-01-31T09:30:00`, an optional trailing `Z`, fractional
/// seconds, an explicit UTC offset (kept as wall-clock time) and the compact
/// `20240131093000` form.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.naive_local());
    }
    let raw = raw.strip_suffix('Z').unwrap_or(raw);
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::parse_timestamp;
    use crate::envelope::{EbxmlEnvelope, EnvelopeKind};
    use crate::error::CodecError;

    const MINIMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP:Envelope xmlns:SOAP="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:eb="http://www.oasis-open.org/committees/ebxml-msg/schema/msg-header-2_0.xsd">
  <SOAP:Header>
    <eb:MessageHeader eb:version="2.0">
      <eb:From><eb:PartyId eb:type="urn:x">SENDER-1</eb:PartyId></eb:From>
      <eb:To><eb:PartyId>RECEIVER-1</eb:PartyId></eb:To>
      <eb:CPAId>S1001A1630</eb:CPAId>
      <eb:ConversationId>CONV-1</eb:ConversationId>
      <eb:Service>urn:nhs:names:services:pdsquery</eb:Service>
      <eb:Action>QUPA_IN000006UK02</eb:Action>
      <eb:MessageData>
        <eb:MessageId>MSG-1</eb:MessageId>
        <eb:Timestamp>2024-01-31T09:30:00Z</eb:Timestamp>
      </eb:MessageData>
      <eb:Vendor>ignored</eb:Vendor>
    </eb:MessageHeader>
  </SOAP:Header>
  <SOAP:Body/>
</SOAP:Envelope>"#;

    #[test]
    fn parses_header_fields_by_local_name() {
        let envelope = EbxmlEnvelope::parse(MINIMAL).expect("minimal envelope parses");

        assert_eq!(envelope.from_party, "SENDER-1");
        assert_eq!(envelope.from_party_type.as_deref(), Some("urn:x"));
        assert_eq!(envelope.to_party, "RECEIVER-1");
        assert_eq!(envelope.to_party_type, None);
        assert_eq!(envelope.cpa_id, "S1001A1630");
        assert_eq!(envelope.action, "QUPA_IN000006UK02");
        assert_eq!(envelope.message_data.message_id, "MSG-1");
        assert_eq!(
            envelope.message_data.timestamp,
            NaiveDate::from_ymd_opt(2024, 1, 31).and_then(|d| d.and_hms_opt(9, 30, 0))
        );
        assert!(!envelope.duplicate_elimination);
        assert_eq!(envelope.kind(), EnvelopeKind::Manifest);
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let xml = MINIMAL.replace("<eb:CPAId>S1001A1630</eb:CPAId>", "");
        let err = EbxmlEnvelope::parse(&xml).expect_err("missing CPAId");
        assert!(matches!(err, CodecError::MalformedEnvelope(m) if m.contains("CPAId")));
    }

    #[test]
    fn wrong_root_is_malformed() {
        let err = EbxmlEnvelope::parse("<Other/>").expect_err("wrong root");
        assert!(matches!(err, CodecError::MalformedEnvelope(_)));
    }

    #[test]
    fn unparsable_timestamp_is_malformed() {
        let xml = MINIMAL.replace("2024-01-31T09:30:00Z", "yesterday");
        assert!(EbxmlEnvelope::parse(&xml).is_err());
    }

    #[test]
    fn bare_soap_fault_maps_to_error_info() {
        let xml = MINIMAL
            .replace("QUPA_IN000006UK02", "MessageError")
            .replace(
                "<SOAP:Body/>",
                "<SOAP:Body><SOAP:Fault><faultcode>SOAP:Server</faultcode>\
                 <faultstring>boom</faultstring></SOAP:Fault></SOAP:Body>",
            );
        let envelope = EbxmlEnvelope::parse(&xml).expect("fault parses");
        let error = envelope.error.expect("error info");
        assert_eq!(error.code, "SOAP:Server");
        assert_eq!(error.description, "boom");
        assert!(envelope.action == "MessageError");
    }

    #[test]
    fn timestamp_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31).and_then(|d| d.and_hms_opt(9, 30, 0));
        assert_eq!(parse_timestamp("2024-01-31T09:30:00"), expected);
        assert_eq!(parse_timestamp("2024-01-31T09:30:00Z"), expected);
        assert_eq!(parse_timestamp("20240131093000"), expected);
        assert_eq!(parse_timestamp("2024-01-31T09:30:00+01:00"), expected);
        assert!(parse_timestamp("2024-01-31T09:30:00.250").is_some());
        assert!(parse_timestamp("31/01/2024").is_none());
    }
}
