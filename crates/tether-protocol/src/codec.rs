//! Tokio codec for framed protocol messages

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::mac::{FrameMac, Side, TAG_LEN};
use crate::message::Message;
use crate::request::RequestId;
use crate::secret::SessionKey;

/// A complete frame with header and payload
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Request this frame belongs to
    pub request_id: RequestId,
    /// The message payload
    pub message: Message,
}

impl Frame {
    /// Create a new frame
    pub fn new(request_id: RequestId, message: Message) -> Self {
        Self {
            request_id,
            message,
        }
    }

    /// Create a frame not bound to any request
    pub fn control(message: Message) -> Self {
        Self::new(RequestId::CONTROL, message)
    }
}

/// Codec for encoding/decoding protocol frames
///
/// Frames are plain until [`authenticate`](Self::authenticate) is called;
/// from then on each frame is followed by a [`TAG_LEN`]-byte tag.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Header already consumed while waiting for its payload
    pending_header: Option<FrameHeader>,
    /// Tags outgoing frames
    seal: Option<FrameMac>,
    /// Checks incoming frames
    open: Option<FrameMac>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag every later frame in both directions
    ///
    /// `side` is the end this codec belongs to. Both ends must switch at
    /// the same frame boundary.
    pub fn authenticate(
        &mut self,
        key: &SessionKey,
        client_nonce: &str,
        server_nonce: &str,
        side: Side,
    ) -> Result<(), ProtocolError> {
        self.seal = Some(FrameMac::new(key, client_nonce, server_nonce, side)?);
        self.open = Some(FrameMac::new(key, client_nonce, server_nonce, side.peer())?);
        Ok(())
    }

    /// Whether frames carry tags
    pub fn is_authenticated(&self) -> bool {
        self.seal.is_some()
    }

    /// Whether a header has been consumed and its payload is still owed
    pub fn is_mid_frame(&self) -> bool {
        self.pending_header.is_some()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let tag_len = if self.open.is_some() { TAG_LEN } else { 0 };
        if src.len() < payload_len + tag_len {
            self.pending_header = Some(header);
            src.reserve(payload_len + tag_len - src.len());
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        if let Some(mac) = self.open.as_mut() {
            let tag = src.split_to(TAG_LEN);
            let mut raw_header = BytesMut::with_capacity(HEADER_SIZE);
            header.encode(&mut raw_header);
            if !mac.check(&raw_header, &payload, &tag) {
                return Err(ProtocolError::FrameAuthentication);
            }
        }
        let message: Message = bincode::deserialize(&payload)?;

        Ok(Some(Frame {
            request_id: header.request_id,
            message,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&frame.message)?;
        let payload_len = payload.len();

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header = FrameHeader::new(
            frame.request_id,
            frame.message.message_type(),
            payload_len as u32,
        );
        let start = dst.len();
        header.encode(dst);
        dst.extend_from_slice(&payload);

        if let Some(mac) = self.seal.as_mut() {
            let tag = mac.seal(&dst[start..start + HEADER_SIZE], &payload);
            dst.extend_from_slice(&tag);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn keyed_pair() -> (FrameCodec, FrameCodec) {
        let key = SessionKey::generate();
        let mut client = FrameCodec::new();
        let mut server = FrameCodec::new();
        client.authenticate(&key, "cn", "sn", Side::Client).unwrap();
        server.authenticate(&key, "cn", "sn", Side::Server).unwrap();
        (client, server)
    }

    #[test]
    fn test_codec_exec_message() {
        let mut codec = FrameCodec::new();

        let frame = Frame::new(
            RequestId::new(1),
            Message::Exec {
                argv: vec!["uname".to_string(), "-a".to_string()],
                env: vec![("LC_ALL".to_string(), "C".to_string())],
                cwd: None,
            },
        );

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = FrameCodec::new();

        let frame = Frame::new(RequestId::new(9), Message::Stdout(Bytes::from("hello")));
        let mut full = BytesMut::new();
        codec.encode(frame, &mut full).unwrap();

        let mut partial = full.split_to(HEADER_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Header complete, payload still missing
        partial.extend_from_slice(&full.split_to(3));
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.request_id, RequestId::new(9));
        assert_eq!(decoded.message, Message::Stdout(Bytes::from("hello")));
    }

    #[test]
    fn test_codec_back_to_back_frames() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(Frame::control(Message::Heartbeat { timestamp: 5 }), &mut buf)
            .unwrap();
        codec.encode(Frame::control(Message::Goodbye), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.message, Message::Heartbeat { timestamp: 5 });
        assert_eq!(second.message, Message::Goodbye);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_authenticated_frames_carry_tags() {
        let (mut client, mut server) = keyed_pair();
        assert!(client.is_authenticated());

        let mut buf = BytesMut::new();
        client
            .encode(Frame::control(Message::Heartbeat { timestamp: 1 }), &mut buf)
            .unwrap();
        let mut plain = BytesMut::new();
        FrameCodec::new()
            .encode(Frame::control(Message::Heartbeat { timestamp: 1 }), &mut plain)
            .unwrap();
        assert_eq!(buf.len(), plain.len() + TAG_LEN);

        // Tag still missing
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(server.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&buf);
        let decoded = server.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.message, Message::Heartbeat { timestamp: 1 });

        // And the other way
        let mut reply = BytesMut::new();
        server
            .encode(Frame::control(Message::HeartbeatAck { timestamp: 1 }), &mut reply)
            .unwrap();
        assert!(client.decode(&mut reply).unwrap().is_some());
    }

    #[test]
    fn test_tampered_frame_rejected() {
        let (mut client, mut server) = keyed_pair();
        let mut buf = BytesMut::new();
        client
            .encode(
                Frame::new(
                    RequestId::new(1),
                    Message::Exec {
                        argv: vec!["true".to_string()],
                        env: vec![],
                        cwd: None,
                    },
                ),
                &mut buf,
            )
            .unwrap();

        // Flip the last byte of the payload
        let at = buf.len() - TAG_LEN - 1;
        buf[at] ^= 0x01;
        assert!(matches!(
            server.decode(&mut buf),
            Err(ProtocolError::FrameAuthentication)
        ));
    }

    #[test]
    fn test_injected_plain_frame_rejected() {
        let (_, mut server) = keyed_pair();
        let mut buf = BytesMut::new();
        FrameCodec::new()
            .encode(Frame::control(Message::Goodbye), &mut buf)
            .unwrap();
        buf.extend_from_slice(&[0u8; TAG_LEN]);

        assert!(matches!(
            server.decode(&mut buf),
            Err(ProtocolError::FrameAuthentication)
        ));
    }

    #[test]
    fn test_replayed_frame_rejected() {
        let (mut client, mut server) = keyed_pair();
        let mut buf = BytesMut::new();
        client
            .encode(Frame::control(Message::Heartbeat { timestamp: 7 }), &mut buf)
            .unwrap();
        let copy = buf.clone();

        assert!(server.decode(&mut buf).unwrap().is_some());
        let mut replay = copy;
        assert!(matches!(
            server.decode(&mut replay),
            Err(ProtocolError::FrameAuthentication)
        ));
    }
}
