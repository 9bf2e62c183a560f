#![no_main]

use courier_codec::MultipartBody;
use courier_node::verify_manifest;
use libfuzzer_sys::fuzz_target;

const CONTENT_TYPE: &str = "multipart/related; boundary=\"--=_fuzz\"; type=\"text/xml\"";

fuzz_target!(|data: &[u8]| {
    if let Ok(body) = MultipartBody::parse(data, CONTENT_TYPE) {
        let _ = verify_manifest(&body);
    }
});
