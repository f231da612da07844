//! # Wire Message Bodies
//!
//! Encoders and decoders for the body of each opcode, in both directions so
//! test servers can reuse them.
//!
//! ## OP_MSG (2013)
//! ```text
//! [FlagBits u32] ([Kind 0][Document] | [Kind 1][Size i32][Identifier cstring][Document*])* [Checksum u32]?
//! ```
//!
//! ## OP_QUERY (2004)
//! ```text
//! [Flags i32] [FullCollectionName cstring] [Skip i32] [Return i32] [Query Document]
//! ```
//!
//! ## OP_REPLY (1)
//! ```text
//! [Flags i32] [CursorId i64] [StartingFrom i32] [NumberReturned i32] [Document*]
//! ```
//!
//! ## OP_COMPRESSED (2012)
//! ```text
//! [OriginalOpcode i32] [UncompressedSize i32] [CompressorId u8] [Data]
//! ```

use crate::core::bson::{decode_document_prefix, decode_document_sequence, encode_document};
use crate::core::document::{Document, Value};
use crate::core::packet::OpCode;
use crate::error::{DriverError, EncodingErrorKind, Result};
use crate::utils::compression::Compressor;

/// OP_MSG flag: a CRC-32C checksum trails the sections
pub const MSG_CHECKSUM_PRESENT: u32 = 1;
/// OP_MSG flag: the sender will not wait for a reply
pub const MSG_MORE_TO_COME: u32 = 1 << 1;

/// OP_REPLY flag: the cursor id in the request is unknown to the server
pub const REPLY_CURSOR_NOT_FOUND: i32 = 1;
/// OP_REPLY flag: the single returned document is an `$err` document
pub const REPLY_QUERY_FAILURE: i32 = 1 << 1;

/// Message family used for commands on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    /// `OP_MSG`, servers with wire version 6 or newer
    OpMsg,
    /// Legacy `OP_QUERY` against `<db>.$cmd`, answered with `OP_REPLY`
    OpQuery,
}

impl MessageFormat {
    /// Lowest `maxWireVersion` that speaks `OP_MSG`
    pub const OP_MSG_MIN_WIRE_VERSION: i32 = 6;

    pub fn for_wire_version(max_wire_version: i32) -> Self {
        if max_wire_version >= Self::OP_MSG_MIN_WIRE_VERSION {
            MessageFormat::OpMsg
        } else {
            MessageFormat::OpQuery
        }
    }

    pub fn op_code(self) -> OpCode {
        match self {
            MessageFormat::OpMsg => OpCode::Msg,
            MessageFormat::OpQuery => OpCode::Query,
        }
    }
}

fn malformed(kind: EncodingErrorKind, message: impl Into<String>) -> DriverError {
    DriverError::encoding(kind, message)
}

fn read_i32(bytes: &[u8], at: usize, what: &str) -> Result<i32> {
    bytes
        .get(at..at + 4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| malformed(EncodingErrorKind::TruncatedInput, format!("missing {what}")))
}

fn read_cstring(bytes: &[u8], at: usize, what: &str) -> Result<(String, usize)> {
    let rest = bytes
        .get(at..)
        .ok_or_else(|| malformed(EncodingErrorKind::TruncatedInput, format!("missing {what}")))?;
    let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| {
        malformed(
            EncodingErrorKind::TruncatedInput,
            format!("unterminated {what}"),
        )
    })?;
    let text = std::str::from_utf8(&rest[..nul])
        .map_err(|e| malformed(EncodingErrorKind::InvalidUtf8, format!("{what}: {e}")))?;
    Ok((text.to_string(), at + nul + 1))
}

/// Decoded OP_MSG with document-sequence sections folded into the body
#[derive(Debug, Clone, PartialEq)]
pub struct OpMsg {
    pub flags: u32,
    pub body: Document,
}

/// Encode a single-section OP_MSG body
pub fn encode_op_msg(flags: u32, body: &Document) -> Result<Vec<u8>> {
    let doc = encode_document(body)?;
    let mut out = Vec::with_capacity(5 + doc.len());
    out.extend_from_slice(&(flags & !MSG_CHECKSUM_PRESENT).to_le_bytes());
    out.push(0);
    out.extend_from_slice(&doc);
    Ok(out)
}

/// Decode an OP_MSG body. A trailing checksum is stripped, not verified.
pub fn decode_op_msg(bytes: &[u8]) -> Result<OpMsg> {
    let flags = read_i32(bytes, 0, "OP_MSG flag bits")? as u32;
    let mut end = bytes.len();
    if flags & MSG_CHECKSUM_PRESENT != 0 {
        end = end.checked_sub(4).filter(|&e| e >= 4).ok_or_else(|| {
            malformed(EncodingErrorKind::TruncatedInput, "OP_MSG checksum missing")
        })?;
    }
    let sections = &bytes[4..end];

    let mut body: Option<Document> = None;
    let mut sequences: Vec<(String, Vec<Document>)> = Vec::new();
    let mut pos = 0;
    while pos < sections.len() {
        let kind = sections[pos];
        pos += 1;
        match kind {
            0 => {
                let (doc, used) = decode_document_prefix(&sections[pos..])?;
                if body.replace(doc).is_some() {
                    return Err(malformed(
                        EncodingErrorKind::InvalidValue,
                        "OP_MSG carries more than one body section",
                    ));
                }
                pos += used;
            }
            1 => {
                let size = read_i32(sections, pos, "document sequence size")?;
                let size = usize::try_from(size).ok().filter(|&s| s >= 4).ok_or_else(|| {
                    malformed(
                        EncodingErrorKind::LengthMismatch,
                        format!("document sequence size {size}"),
                    )
                })?;
                let section = sections.get(pos..pos + size).ok_or_else(|| {
                    malformed(
                        EncodingErrorKind::TruncatedInput,
                        "document sequence runs past the message",
                    )
                })?;
                let (identifier, docs_at) = read_cstring(section, 4, "sequence identifier")?;
                let docs = decode_document_sequence(&section[docs_at..])?;
                sequences.push((identifier, docs));
                pos += size;
            }
            other => {
                return Err(malformed(
                    EncodingErrorKind::InvalidValue,
                    format!("unknown OP_MSG section kind {other}"),
                ))
            }
        }
    }

    let mut body = body.ok_or_else(|| {
        malformed(
            EncodingErrorKind::TruncatedInput,
            "OP_MSG has no body section",
        )
    })?;
    for (identifier, docs) in sequences {
        body.set(
            identifier,
            Value::Array(docs.into_iter().map(Value::Document).collect()),
        );
    }
    Ok(OpMsg { flags, body })
}

/// Decoded OP_QUERY
#[derive(Debug, Clone, PartialEq)]
pub struct OpQuery {
    pub flags: i32,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
}

/// Encode a command as OP_QUERY against `<db>.$cmd`
pub fn encode_op_query(db: &str, command: &Document) -> Result<Vec<u8>> {
    let doc = encode_document(command)?;
    let namespace = format!("{db}.$cmd");
    let mut out = Vec::with_capacity(12 + namespace.len() + 1 + doc.len());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(namespace.as_bytes());
    out.push(0);
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&(-1i32).to_le_bytes());
    out.extend_from_slice(&doc);
    Ok(out)
}

pub fn decode_op_query(bytes: &[u8]) -> Result<OpQuery> {
    let flags = read_i32(bytes, 0, "OP_QUERY flags")?;
    let (full_collection_name, at) = read_cstring(bytes, 4, "collection name")?;
    let number_to_skip = read_i32(bytes, at, "numberToSkip")?;
    let number_to_return = read_i32(bytes, at + 4, "numberToReturn")?;
    // An optional field selector may follow; only the query is kept
    let (query, _) = decode_document_prefix(&bytes[(at + 8).min(bytes.len())..])?;
    Ok(OpQuery {
        flags,
        full_collection_name,
        number_to_skip,
        number_to_return,
        query,
    })
}

/// Decoded OP_REPLY
#[derive(Debug, Clone, PartialEq)]
pub struct OpReply {
    pub flags: i32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl OpReply {
    pub fn query_failed(&self) -> bool {
        self.flags & REPLY_QUERY_FAILURE != 0
    }
}

pub fn encode_op_reply(flags: i32, cursor_id: i64, documents: &[Document]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&cursor_id.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    let count = i32::try_from(documents.len())
        .map_err(|_| malformed(EncodingErrorKind::DocumentTooLarge, "too many documents"))?;
    out.extend_from_slice(&count.to_le_bytes());
    for doc in documents {
        out.extend_from_slice(&encode_document(doc)?);
    }
    Ok(out)
}

pub fn decode_op_reply(bytes: &[u8]) -> Result<OpReply> {
    let flags = read_i32(bytes, 0, "OP_REPLY flags")?;
    let cursor_id = bytes
        .get(4..12)
        .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .ok_or_else(|| malformed(EncodingErrorKind::TruncatedInput, "missing cursor id"))?;
    let starting_from = read_i32(bytes, 12, "startingFrom")?;
    let number_returned = read_i32(bytes, 16, "numberReturned")?;
    let documents = decode_document_sequence(&bytes[20..])?;
    if number_returned < 0 || documents.len() != number_returned as usize {
        return Err(malformed(
            EncodingErrorKind::LengthMismatch,
            format!(
                "OP_REPLY declares {number_returned} documents, contains {}",
                documents.len()
            ),
        ));
    }
    Ok(OpReply {
        flags,
        cursor_id,
        starting_from,
        documents,
    })
}

/// Wrap an encoded body in OP_COMPRESSED
pub fn encode_op_compressed(original: OpCode, body: &[u8], compressor: Compressor) -> Result<Vec<u8>> {
    let uncompressed = i32::try_from(body.len())
        .map_err(|_| malformed(EncodingErrorKind::DocumentTooLarge, "message too large to compress"))?;
    let data = compressor.compress(body)?;
    let mut out = Vec::with_capacity(9 + data.len());
    out.extend_from_slice(&original.as_i32().to_le_bytes());
    out.extend_from_slice(&uncompressed.to_le_bytes());
    out.push(compressor.id());
    out.extend_from_slice(&data);
    Ok(out)
}

/// Unwrap OP_COMPRESSED into the original opcode and body
pub fn decode_op_compressed(bytes: &[u8], max_size: usize) -> Result<(i32, Vec<u8>)> {
    let original = read_i32(bytes, 0, "original opcode")?;
    let declared = read_i32(bytes, 4, "uncompressed size")?;
    let compressor_id = *bytes
        .get(8)
        .ok_or_else(|| malformed(EncodingErrorKind::TruncatedInput, "missing compressor id"))?;
    let declared = usize::try_from(declared)
        .ok()
        .filter(|&d| d <= max_size)
        .ok_or_else(|| {
            malformed(
                EncodingErrorKind::DocumentTooLarge,
                format!("uncompressed size {declared} exceeds {max_size}"),
            )
        })?;
    let body = Compressor::from_id(compressor_id)?.decompress(&bytes[9..], declared)?;
    if body.len() != declared {
        return Err(malformed(
            EncodingErrorKind::LengthMismatch,
            format!(
                "OP_COMPRESSED declares {declared} bytes, inflated to {}",
                body.len()
            ),
        ));
    }
    Ok((original, body))
}

/// Encode a command for `format`, compressing it when a compressor is given
pub fn encode_command(
    format: MessageFormat,
    db: &str,
    command: &Document,
    compressor: Option<Compressor>,
) -> Result<(OpCode, Vec<u8>)> {
    let body = match format {
        MessageFormat::OpMsg => {
            let mut with_db = command.clone();
            if !with_db.contains_key("$db") {
                with_db.set("$db", db);
            }
            encode_op_msg(0, &with_db)?
        }
        MessageFormat::OpQuery => encode_op_query(db, command)?,
    };
    match compressor {
        Some(c) => Ok((
            OpCode::Compressed,
            encode_op_compressed(format.op_code(), &body, c)?,
        )),
        None => Ok((format.op_code(), body)),
    }
}

/// A reply body decoded into its command-level form
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyMessage {
    Msg(OpMsg),
    Reply(OpReply),
}

/// Decode a reply of any supported opcode, unwrapping OP_COMPRESSED
pub fn decode_reply(op_code: i32, body: &[u8], max_size: usize) -> Result<ReplyMessage> {
    match OpCode::from_i32(op_code) {
        Some(OpCode::Msg) => Ok(ReplyMessage::Msg(decode_op_msg(body)?)),
        Some(OpCode::Reply) => Ok(ReplyMessage::Reply(decode_op_reply(body)?)),
        Some(OpCode::Compressed) => {
            let (inner, body) = decode_op_compressed(body, max_size)?;
            if inner == OpCode::Compressed.as_i32() {
                return Err(malformed(
                    EncodingErrorKind::InvalidValue,
                    "nested OP_COMPRESSED",
                ));
            }
            decode_reply(inner, &body, max_size)
        }
        _ => Err(DriverError::transport(
            crate::error::TransportErrorKind::UnexpectedResponse,
            format!("unexpected reply opcode {op_code}"),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_op_msg_adds_db_and_roundtrips() {
        let (op, body) =
            encode_command(MessageFormat::OpMsg, "shop", &doc! { "ping" => 1 }, None).unwrap();
        assert_eq!(op, OpCode::Msg);
        let msg = decode_op_msg(&body).unwrap();
        assert_eq!(msg.body.first_key(), Some("ping"));
        assert_eq!(msg.body.get_str("$db").unwrap(), "shop");
    }

    #[test]
    fn test_op_msg_folds_document_sequences() {
        let mut body = encode_op_msg(0, &doc! { "insert" => "c" }).unwrap();
        let docs = [doc! { "a" => 1 }, doc! { "a" => 2 }];
        let mut section = Vec::new();
        section.extend_from_slice(b"documents\0");
        for d in &docs {
            section.extend(encode_document(d).unwrap());
        }
        body.push(1);
        body.extend_from_slice(&((section.len() + 4) as i32).to_le_bytes());
        body.extend(section);

        let msg = decode_op_msg(&body).unwrap();
        let folded = msg.body.get_array("documents").unwrap();
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[1], Value::Document(doc! { "a" => 2 }));
    }

    #[test]
    fn test_op_msg_checksum_is_stripped() {
        let mut body = encode_op_msg(0, &doc! { "ok" => 1.0 }).unwrap();
        body[0] |= MSG_CHECKSUM_PRESENT as u8;
        body.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let msg = decode_op_msg(&body).unwrap();
        assert_eq!(msg.body.get_f64("ok").unwrap(), 1.0);
    }

    #[test]
    fn test_op_query_layout() {
        let body = encode_op_query("admin", &doc! { "isMaster" => 1 }).unwrap();
        let query = decode_op_query(&body).unwrap();
        assert_eq!(query.full_collection_name, "admin.$cmd");
        assert_eq!(query.number_to_skip, 0);
        assert_eq!(query.number_to_return, -1);
        assert_eq!(query.query.get_i32("isMaster").unwrap(), 1);
    }

    #[test]
    fn test_op_reply_roundtrip_and_count_check() {
        let docs = vec![doc! { "ok" => 1 }];
        let mut body = encode_op_reply(0, 99, &docs).unwrap();
        let reply = decode_op_reply(&body).unwrap();
        assert_eq!(reply.cursor_id, 99);
        assert_eq!(reply.documents, docs);
        assert!(!reply.query_failed());

        body[16] = 2;
        assert_eq!(
            decode_op_reply(&body).unwrap_err().encoding_kind(),
            Some(EncodingErrorKind::LengthMismatch)
        );
    }

    #[test]
    fn test_compressed_reply_unwraps() {
        let inner = encode_op_msg(0, &doc! { "ok" => 1, "n" => 5 }).unwrap();
        let wrapped =
            encode_op_compressed(OpCode::Msg, &inner, Compressor::Zstd { level: 1 }).unwrap();
        match decode_reply(OpCode::Compressed.as_i32(), &wrapped, 1 << 20).unwrap() {
            ReplyMessage::Msg(msg) => assert_eq!(msg.body.get_i32("n").unwrap(), 5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_compressed_size_bound() {
        let inner = vec![0u8; 4096];
        let wrapped = encode_op_compressed(OpCode::Msg, &inner, Compressor::Noop).unwrap();
        assert!(decode_op_compressed(&wrapped, 1024).is_err());
        assert_eq!(decode_op_compressed(&wrapped, 8192).unwrap().1.len(), 4096);
    }

    #[test]
    fn test_unknown_compressor_rejected() {
        let mut wrapped = encode_op_compressed(OpCode::Msg, &[1, 2, 3], Compressor::Noop).unwrap();
        wrapped[8] = 1;
        assert!(matches!(
            decode_op_compressed(&wrapped, 1024),
            Err(DriverError::Compression(_))
        ));
    }
}
