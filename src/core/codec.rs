//! # Wire Codec
//!
//! Tokio codec that frames [`Packet`]s over a byte stream.
//!
//! The decoder waits until the whole message named by the length prefix is
//! buffered. Messages shorter than a header or longer than the configured
//! maximum are rejected before any body allocation.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::packet::{MessageHeader, Packet, DEFAULT_MAX_MESSAGE_SIZE, HEADER_LEN};
use crate::error::{constants, DriverError, Result, TransportErrorKind};

#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    max_message_size: usize,
}

impl WireCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Raise or lower the limit, e.g. after the server reports its own
    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.max_message_size = max_message_size;
    }

    fn check_length(&self, length: i64) -> Result<usize> {
        if length < HEADER_LEN as i64 {
            return Err(DriverError::transport(
                TransportErrorKind::IoError,
                format!("{}: length {length}", constants::ERR_INVALID_HEADER),
            ));
        }
        if length as u64 > self.max_message_size as u64 {
            return Err(DriverError::transport(
                TransportErrorKind::IoError,
                format!(
                    "{}: {length} > {}",
                    constants::ERR_OVERSIZED_MESSAGE,
                    self.max_message_size
                ),
            ));
        }
        Ok(length as usize)
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Decoder for WireCodec {
    type Item = Packet;
    type Error = DriverError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let declared = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        let length = self.check_length(declared as i64)?;

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        let header = MessageHeader::from_bytes(&frame)?;
        frame.advance(HEADER_LEN);
        Ok(Some(Packet {
            header,
            body: frame.to_vec(),
        }))
    }
}

impl Encoder<Packet> for WireCodec {
    type Error = DriverError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        self.check_length(packet.len() as i64)?;
        dst.reserve(packet.len());
        dst.put_slice(&packet.header.to_bytes());
        dst.put_slice(&packet.body);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::packet::OpCode;

    #[test]
    fn test_partial_frames_wait_for_more() {
        let packet = Packet::request(3, OpCode::Msg, vec![9; 32]).unwrap();
        let bytes = packet.to_bytes();
        let mut codec = WireCodec::default();

        let mut buf = BytesMut::from(&bytes[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[10..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(packet));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let a = Packet::request(1, OpCode::Msg, vec![1]).unwrap();
        let b = Packet::request(2, OpCode::Query, vec![2, 2]).unwrap();
        let mut codec = WireCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(a.clone(), &mut buf).unwrap();
        codec.encode(b.clone(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(a));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_rejects_undersized_and_oversized() {
        let mut codec = WireCodec::new(1024);
        let mut buf = BytesMut::from(&8i32.to_le_bytes()[..]);
        assert!(codec.decode(&mut buf).is_err());

        let mut buf = BytesMut::from(&4096i32.to_le_bytes()[..]);
        assert!(codec.decode(&mut buf).is_err());

        let big = Packet::request(1, OpCode::Msg, vec![0; 2048]).unwrap();
        assert!(codec.encode(big, &mut BytesMut::new()).is_err());
    }
}
