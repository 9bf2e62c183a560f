use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Prefix of manifest hrefs that point at a multipart part.
pub const CID_SCHEME: &str = "cid:";

/// MIME `Content-Id` value.
///
/// Holds the wire form (`<token>`) and lazily derives the logical form
/// (`token`). Equality and hashing use the wire form only.
#[derive(Clone)]
pub struct ContentId {
    raw: String,
    logical: OnceLock<String>,
}

impl ContentId {
    /// Wraps a header value as it appears on the wire.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into().trim().to_string(),
            logical: OnceLock::new(),
        }
    }

    /// Builds the bracketed wire form from a bare token.
    pub fn from_logical(logical: impl AsRef<str>) -> Self {
        let logical = logical.as_ref().trim();
        let bare = logical
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(logical);
        Self::from_raw(format!("<{bare}>"))
    }

    /// Resolves a `cid:` manifest href into the content id it refers to.
    ///
    /// Returns `None` when the href does not use the `cid:` scheme
    /// (compared case-insensitively). The suffix is percent-decoded.
    pub fn from_cid_href(href: &str) -> Option<Self> {
        let href = href.trim();
        let scheme = href.get(..CID_SCHEME.len())?;
        if !scheme.eq_ignore_ascii_case(CID_SCHEME) {
            return None;
        }
        Some(Self::from_logical(percent_decode(&href[CID_SCHEME.len()..])))
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn logical(&self) -> &str {
        self.logical.get_or_init(|| {
            self.raw
                .strip_prefix('<')
                .and_then(|s| s.strip_suffix('>'))
                .unwrap_or(&self.raw)
                .trim()
                .to_string()
        })
    }

    /// `cid:` href referencing this content id from a manifest.
    pub fn to_cid_href(&self) -> String {
        format!("{CID_SCHEME}{}", self.logical())
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl PartialEq for ContentId {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ContentId {}

impl Hash for ContentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentId").field(&self.raw).finish()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::ContentId;

    #[test]
    fn raw_and_logical_forms_convert() {
        let from_raw = ContentId::from_raw("<payload@example>");
        assert_eq!(from_raw.logical(), "payload@example");

        let from_logical = ContentId::from_logical("payload@example");
        assert_eq!(from_logical.raw(), "<payload@example>");
        assert_eq!(from_raw, from_logical);
    }

    #[test]
    fn equality_uses_raw_form_only() {
        let bracketed = ContentId::from_raw("<a>");
        let bare = ContentId::from_raw("a");
        assert_eq!(bracketed.logical(), bare.logical());
        assert_ne!(bracketed, bare);
    }

    #[test]
    fn cid_href_is_case_insensitive_and_percent_decoded() {
        let id = ContentId::from_cid_href("CID:part%401").expect("cid href");
        assert_eq!(id.raw(), "<part@1>");
        assert!(ContentId::from_cid_href("http://example/part").is_none());
        assert!(ContentId::from_cid_href("ci").is_none());
    }

    #[test]
    fn to_cid_href_uses_logical_form() {
        assert_eq!(ContentId::from_raw("<x@y>").to_cid_href(), "cid:x@y");
    }
}
