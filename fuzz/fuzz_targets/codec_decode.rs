#![no_main]

use courier_codec::{ContentId, EbxmlEnvelope, MultipartBody};
use libfuzzer_sys::fuzz_target;

const CONTENT_TYPE: &str =
    "multipart/related; boundary=\"--=_fuzz\"; type=\"text/xml\"; start=\"<ebXMLHeader@fuzz>\"";

fuzz_target!(|data: &[u8]| {
    let _ = MultipartBody::parse(data, CONTENT_TYPE);
    let _ = EbxmlEnvelope::parse_bytes(data);
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = MultipartBody::parse(b"", text);
        let _ = ContentId::from_cid_href(text);
    }
});
