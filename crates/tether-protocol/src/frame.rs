//! Frame header encoding/decoding
//!
//! After bootstrap every session message travels in a frame with an
//! 8-byte header:
//! - request_id: 4 bytes (u32, big-endian)
//! - message_type: 1 byte (u8)
//! - payload_length: 3 bytes (u24, big-endian, max 16MB)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;
use crate::request::RequestId;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size (16MB - 1, limited by 24-bit length field)
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Frame header containing routing and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Request this frame belongs to
    pub request_id: RequestId,
    /// Type of message in the payload
    pub message_type: MessageType,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(request_id: RequestId, message_type: MessageType, payload_length: u32) -> Self {
        Self {
            request_id,
            message_type,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.request_id.as_u32());
        dst.put_u8(self.message_type.as_u8());
        // 24-bit length
        dst.put_u8((self.payload_length >> 16) as u8);
        dst.put_u16(self.payload_length as u16);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header names an unknown message type; nothing is
    /// consumed in that case.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let type_byte = src[4];
        let message_type =
            MessageType::from_u8(type_byte).ok_or(ProtocolError::UnknownMessageType(type_byte))?;

        let request_id = RequestId::new(src.get_u32());
        src.advance(1);
        let len_high = src.get_u8() as u32;
        let len_low = src.get_u16() as u32;

        Ok(Some(Self {
            request_id,
            message_type,
            payload_length: (len_high << 16) | len_low,
        }))
    }
}
