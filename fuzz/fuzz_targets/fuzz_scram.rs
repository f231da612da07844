#![no_main]

use docwire::protocol::handshake::{ScramConversation, ScramMechanism, ServerFirst};
use libfuzzer_sys::fuzz_target;

const CLIENT_NONCE: &str = "fyko+d2lbbFgONRv9qkxdawL";

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(first) = ServerFirst::parse(text) else {
        return;
    };
    if first.iterations > 8192 {
        return;
    }

    // A server that never saw the password must not get past signature checks
    let mut scram = ScramConversation::with_client_nonce(
        ScramMechanism::Sha256,
        "fuzz",
        "pw",
        CLIENT_NONCE.to_string(),
    );
    if scram.client_first().is_ok() && scram.client_final(text).is_ok() {
        assert!(scram.verify_server_final(text).is_err());
    }
});
