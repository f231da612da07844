#![no_main]

use docwire::core::bson::{decode_document, encode_document};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Anything that decodes must encode back to the same bytes
    if let Ok(doc) = decode_document(data) {
        let encoded = encode_document(&doc).expect("decoded document must re-encode");
        let again = decode_document(&encoded).expect("re-encoded document must decode");
        assert_eq!(again, doc);
    }
});
