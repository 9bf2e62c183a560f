use base64::Engine;
use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::content_id::ContentId;
use crate::error::CodecError;
use crate::headers::EntrySeries;

/// Transfer encoding written when a part does not declare one.
pub const DEFAULT_TRANSFER_ENCODING: &str = "8bit";
/// Content type of the envelope part (part 0).
pub const ENVELOPE_CONTENT_TYPE: &str = "text/xml";

const HEADER_CONTENT_TYPE: &str = "Content-Type";
const HEADER_CONTENT_ID: &str = "Content-Id";
const HEADER_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";

/// One body part of a multipart/related message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part {
    pub content_type: Option<String>,
    pub content_id: Option<ContentId>,
    pub content_transfer_encoding: Option<String>,
    /// Headers other than the three lifted into dedicated fields.
    pub headers: EntrySeries,
    pub body: Bytes,
}

impl Part {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_content_id(mut self, content_id: ContentId) -> Self {
        self.content_id = Some(content_id);
        self
    }

    pub fn with_transfer_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_transfer_encoding = Some(encoding.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Body with its declared transfer encoding undone.
    pub fn decoded_body(&self) -> Result<Bytes, CodecError> {
        let encoding = self
            .content_transfer_encoding
            .as_deref()
            .unwrap_or(DEFAULT_TRANSFER_ENCODING)
            .trim()
            .to_ascii_lowercase();
        match encoding.as_str() {
            "7bit" | "8bit" | "binary" => Ok(self.body.clone()),
            "base64" => {
                let compact: Vec<u8> = self
                    .body
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                base64::engine::general_purpose::STANDARD
                    .decode(compact)
                    .map(Bytes::from)
                    .map_err(|e| CodecError::InvalidBody {
                        encoding: "base64",
                        reason: e.to_string(),
                    })
            }
            _ => Err(CodecError::UnsupportedTransferEncoding(encoding)),
        }
    }

    /// Decoded body as UTF-8 text.
    pub fn body_text(&self) -> Result<String, CodecError> {
        let decoded = self.decoded_body()?;
        String::from_utf8(decoded.to_vec()).map_err(|e| CodecError::InvalidBody {
            encoding: "utf-8",
            reason: e.to_string(),
        })
    }
}

/// Parsed or to-be-sent multipart/related message.
///
/// Part order is significant: part 0 carries the envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartBody {
    pub boundary: String,
    /// `start` parameter of the content type, if any.
    pub start: Option<ContentId>,
    pub preamble: String,
    pub epilogue: String,
    pub parts: Vec<Part>,
}

impl MultipartBody {
    /// Empty body with a freshly generated boundary.
    pub fn new() -> Self {
        Self::with_boundary(generate_boundary())
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            ..Self::default()
        }
    }

    pub fn push_part(&mut self, part: Part) {
        self.parts.push(part);
    }

    pub fn find_part(&self, content_id: &ContentId) -> Option<&Part> {
        self.parts
            .iter()
            .find(|p| p.content_id.as_ref() == Some(content_id))
    }

    /// `Content-Type` header value to send alongside [`Self::serialize`].
    pub fn content_type_header(&self) -> String {
        let mut header = format!(
            "multipart/related; boundary=\"{}\"; type=\"{ENVELOPE_CONTENT_TYPE}\"",
            self.boundary
        );
        let start = self
            .start
            .as_ref()
            .or_else(|| self.parts.first().and_then(|p| p.content_id.as_ref()));
        if let Some(start) = start {
            header.push_str(&format!("; start=\"{}\"", start.raw()));
        }
        header
    }

    /// Parses a multipart body using the boundary from `content_type`.
    pub fn parse(bytes: &[u8], content_type: &str) -> Result<Self, CodecError> {
        let params = parse_content_type_params(content_type);
        let boundary = params
            .get_first_value("boundary")
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                CodecError::MalformedMultipart("content type has no boundary parameter".into())
            })?
            .to_string();
        let start = params.get_first_value("start").map(ContentId::from_raw);

        let delimiter = format!("--{boundary}").into_bytes();
        let first = find_delimiter(bytes, &delimiter, 0).ok_or_else(|| {
            CodecError::MalformedMultipart(format!("opening boundary {boundary} not found"))
        })?;
        let preamble = strip_line_ending(&bytes[..first]);

        let mut parts = Vec::new();
        let mut pos = first + delimiter.len();
        let epilogue = loop {
            if bytes[pos..].starts_with(b"--") {
                break skip_line(bytes, pos + 2)
                    .map(|start| &bytes[start..])
                    .unwrap_or(&[]);
            }
            let part_start = skip_line(bytes, pos).ok_or_else(|| {
                CodecError::MalformedMultipart("part lacks terminating boundary".into())
            })?;
            let next = find_delimiter(bytes, &delimiter, part_start).ok_or_else(|| {
                CodecError::MalformedMultipart("part lacks terminating boundary".into())
            })?;
            parts.push(parse_part(strip_line_ending(&bytes[part_start..next]))?);
            pos = next + delimiter.len();
        };

        Ok(Self {
            boundary,
            start,
            preamble: String::from_utf8_lossy(preamble).into_owned(),
            epilogue: String::from_utf8_lossy(epilogue).into_owned(),
            parts,
        })
    }

    /// Serializes the body with CRLF line endings.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if !self.preamble.is_empty() {
            out.extend_from_slice(self.preamble.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        for part in &self.parts {
            out.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            if let Some(content_type) = &part.content_type {
                write_header(&mut out, HEADER_CONTENT_TYPE, content_type);
            }
            if let Some(content_id) = &part.content_id {
                write_header(&mut out, HEADER_CONTENT_ID, content_id.raw());
            }
            write_header(
                &mut out,
                HEADER_TRANSFER_ENCODING,
                part.content_transfer_encoding
                    .as_deref()
                    .unwrap_or(DEFAULT_TRANSFER_ENCODING),
            );
            for (name, value) in part.headers.iter() {
                write_header(&mut out, name, value);
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&part.body);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--", self.boundary).as_bytes());
        if !self.epilogue.is_empty() {
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(self.epilogue.as_bytes());
        }
        out
    }
}

/// Random boundary token suitable for outbound messages.
pub fn generate_boundary() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("--=_MIMEBoundary_{token}")
}

/// Parses the `; name=value` parameters of a content type header.
///
/// Parameter names are case-insensitive; quoted values may contain `;`.
pub fn parse_content_type_params(header: &str) -> EntrySeries {
    let mut params = EntrySeries::new();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in header.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    for segment in segments.iter().skip(1) {
        let Some((name, value)) = segment.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        params.add(name.trim(), value);
    }
    params
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Finds the next delimiter that starts a line.
fn find_delimiter(bytes: &[u8], delimiter: &[u8], from: usize) -> Option<usize> {
    let mut search = from;
    loop {
        let at = find(bytes, delimiter, search)?;
        let line_start = at == 0 || at == from || bytes[at - 1] == b'\n';
        let terminated = match bytes.get(at + delimiter.len()) {
            None => true,
            Some(next) => matches!(next, b'-' | b'\r' | b'\n' | b' ' | b'\t'),
        };
        if line_start && terminated {
            return Some(at);
        }
        search = at + 1;
    }
}

/// Returns the index just past the next line ending at or after `pos`.
fn skip_line(bytes: &[u8], pos: usize) -> Option<usize> {
    find(bytes, b"\n", pos).map(|i| i + 1)
}

fn strip_line_ending(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

fn parse_part(bytes: &[u8]) -> Result<Part, CodecError> {
    let (header_block, body) = split_header_block(bytes);
    let header_text = std::str::from_utf8(header_block).map_err(|_| {
        CodecError::MalformedMultipart("part headers are not valid UTF-8".into())
    })?;

    let mut lines: Vec<String> = Vec::new();
    for line in header_text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if line.starts_with([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
                continue;
            }
        }
        lines.push(line.to_string());
    }

    let mut part = Part {
        body: Bytes::copy_from_slice(body),
        ..Part::default()
    };
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(CodecError::MalformedMultipart(format!(
                "invalid part header line: {line}"
            )));
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case(HEADER_CONTENT_TYPE) {
            part.content_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(HEADER_CONTENT_ID) {
            part.content_id = Some(ContentId::from_raw(value));
        } else if name.eq_ignore_ascii_case(HEADER_TRANSFER_ENCODING) {
            part.content_transfer_encoding = Some(value.to_string());
        } else {
            part.headers.add(name, value);
        }
    }
    Ok(part)
}

/// Splits a part into its header block and body at the first blank line.
fn split_header_block(bytes: &[u8]) -> (&[u8], &[u8]) {
    if let Some(rest) = bytes.strip_prefix(b"\r\n") {
        return (&[], rest);
    }
    if let Some(rest) = bytes.strip_prefix(b"\n") {
        return (&[], rest);
    }
    let crlf = find(bytes, b"\r\n\r\n", 0).map(|i| (i, 4));
    let lf = find(bytes, b"\n\n", 0).map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((at, len)) => (&bytes[..at], &bytes[at + len..]),
        None => (bytes, &[]),
    }
}
