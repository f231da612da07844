//! # Wire Packet
//!
//! A single wire-protocol message: the 16-byte header plus an opaque body.
//!
//! ```text
//! [Length i32 LE] [RequestId i32 LE] [ResponseTo i32 LE] [OpCode i32 LE] [Body(N)]
//! ```
//!
//! `Length` counts the header itself. Body layouts per opcode live in
//! [`crate::protocol::message`].

use crate::error::{constants, DriverError, Result, TransportErrorKind};

/// Size of the fixed message header in bytes
pub const HEADER_LEN: usize = 16;

/// Default upper bound for a whole message (header included), 48 MiB
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

/// Wire opcodes understood by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Query = 2004,
    Compressed = 2012,
    Msg = 2013,
}

impl OpCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            1 => Some(OpCode::Reply),
            2004 => Some(OpCode::Query),
            2012 => Some(OpCode::Compressed),
            2013 => Some(OpCode::Msg),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Fixed message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MessageHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.message_length.to_le_bytes());
        out[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.response_to.to_le_bytes());
        out[12..16].copy_from_slice(&self.op_code.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(DriverError::transport(
                TransportErrorKind::IoError,
                constants::ERR_INVALID_HEADER,
            ));
        }
        let field = |i: usize| i32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(Self {
            message_length: field(0),
            request_id: field(4),
            response_to: field(8),
            op_code: field(12),
        })
    }

    /// The opcode, if it is one this client understands
    pub fn op(&self) -> Option<OpCode> {
        OpCode::from_i32(self.op_code)
    }
}

/// One framed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: MessageHeader,
    pub body: Vec<u8>,
}

impl Packet {
    /// Build a request packet; `message_length` is derived from the body
    pub fn request(request_id: i32, op_code: OpCode, body: Vec<u8>) -> Result<Self> {
        Self::new(request_id, 0, op_code.as_i32(), body)
    }

    /// Build a reply packet answering `response_to`
    pub fn reply(request_id: i32, response_to: i32, op_code: OpCode, body: Vec<u8>) -> Result<Self> {
        Self::new(request_id, response_to, op_code.as_i32(), body)
    }

    fn new(request_id: i32, response_to: i32, op_code: i32, body: Vec<u8>) -> Result<Self> {
        let total = HEADER_LEN + body.len();
        let message_length = i32::try_from(total).map_err(|_| {
            DriverError::transport(
                TransportErrorKind::IoError,
                format!("{}: {total} bytes", constants::ERR_OVERSIZED_MESSAGE),
            )
        })?;
        Ok(Self {
            header: MessageHeader {
                message_length,
                request_id,
                response_to,
                op_code,
            },
            body,
        })
    }

    /// Total encoded size including the header
    pub fn len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse one complete message; the declared length must match `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = MessageHeader::from_bytes(bytes)?;
        if header.message_length < HEADER_LEN as i32 || header.message_length as usize != bytes.len() {
            return Err(DriverError::transport(
                TransportErrorKind::IoError,
                format!(
                    "{}: declared {} bytes, got {}",
                    constants::ERR_INVALID_HEADER,
                    header.message_length,
                    bytes.len()
                ),
            ));
        }
        Ok(Self {
            header,
            body: bytes[HEADER_LEN..].to_vec(),
        })
    }
}
