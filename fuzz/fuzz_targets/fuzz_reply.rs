#![no_main]

use docwire::core::packet::OpCode;
use docwire::protocol::message::decode_reply;
use docwire::protocol::reply::reply_document;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Reply bodies of every opcode the driver accepts: no panics, bounded inflation
    let Some((&selector, body)) = data.split_first() else {
        return;
    };
    let op_code = match selector % 3 {
        0 => OpCode::Msg,
        1 => OpCode::Reply,
        _ => OpCode::Compressed,
    };
    if let Ok(message) = decode_reply(op_code.as_i32(), body, 1 << 20) {
        let _ = reply_document(message);
    }
});
