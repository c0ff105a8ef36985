//! Frame layer over a byte channel

use bytes::BytesMut;
use tether_protocol::{Frame, FrameCodec, Message, SessionKey, Side};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::SessionError;
use crate::traits::Channel;

/// Bytes requested from the channel per read
const READ_CHUNK: usize = 16 * 1024;

/// Sends and receives whole [`Frame`]s over any [`Channel`]
pub struct FramedChannel {
    inner: Box<dyn Channel>,
    codec: FrameCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl FramedChannel {
    /// Wrap a channel positioned at a frame boundary
    pub fn new(inner: Box<dyn Channel>) -> Self {
        Self {
            inner,
            codec: FrameCodec::new(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
        }
    }

    /// Encode and write one frame
    pub async fn send(&mut self, frame: Frame) -> Result<(), SessionError> {
        self.write_buf.clear();
        self.codec.encode(frame, &mut self.write_buf)?;
        self.inner.write_all(&self.write_buf).await?;
        Ok(())
    }

    /// Tag and check every frame from here on
    ///
    /// Called by both ends right after the `Welcome` frame.
    pub fn authenticate(
        &mut self,
        key: &SessionKey,
        client_nonce: &str,
        server_nonce: &str,
        side: Side,
    ) -> Result<(), SessionError> {
        self.codec.authenticate(key, client_nonce, server_nonce, side)?;
        Ok(())
    }

    /// Send a message outside of any request
    pub async fn send_control(&mut self, message: Message) -> Result<(), SessionError> {
        self.send(Frame::control(message)).await
    }

    /// Next frame, or `None` once the peer closes at a frame boundary
    pub async fn recv(&mut self) -> Result<Option<Frame>, SessionError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(Some(frame));
            }

            let chunk = self.inner.read(READ_CHUNK).await?;
            if chunk.is_empty() {
                if self.read_buf.is_empty() && !self.codec.is_mid_frame() {
                    return Ok(None);
                }
                return Err(SessionError::UnexpectedClose);
            }
            self.read_buf.extend_from_slice(&chunk);
        }
    }

    /// Label of the underlying channel's peer
    pub fn peer_name(&self) -> &str {
        self.inner.peer_name()
    }

    /// Close the underlying channel
    pub async fn close(&mut self) {
        self.inner.close().await;
    }

    /// Unwrap the underlying channel, dropping any unread buffered bytes
    pub fn into_inner(self) -> Box<dyn Channel> {
        self.inner
    }
}

impl std::fmt::Debug for FramedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedChannel")
            .field("peer", &self.inner.peer_name())
            .field("buffered", &self.read_buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::StreamChannel;
    use bytes::Bytes;
    use tether_protocol::RequestId;
    use tokio::io::{duplex, split, AsyncWriteExt};

    fn framed_pair() -> (FramedChannel, FramedChannel) {
        let (a, b) = duplex(4096);
        let (ar, aw) = split(a);
        let (br, bw) = split(b);
        (
            FramedChannel::new(Box::new(StreamChannel::new(ar, aw, "a"))),
            FramedChannel::new(Box::new(StreamChannel::new(br, bw, "b"))),
        )
    }

    #[tokio::test]
    async fn test_frames_cross_the_channel() {
        let (mut left, mut right) = framed_pair();

        left.send(Frame::new(RequestId::new(4), Message::Stdout(Bytes::from("out"))))
            .await
            .unwrap();
        left.send_control(Message::Goodbye).await.unwrap();

        let first = right.recv().await.unwrap().unwrap();
        assert_eq!(first.request_id, RequestId::new(4));
        assert_eq!(first.message, Message::Stdout(Bytes::from("out")));
        assert_eq!(right.recv().await.unwrap().unwrap().message, Message::Goodbye);
        assert_eq!(right.peer_name(), "b");
    }

    #[tokio::test]
    async fn test_clean_close_is_none() {
        let (mut left, mut right) = framed_pair();
        left.send_control(Message::Goodbye).await.unwrap();
        left.close().await;

        assert!(right.recv().await.unwrap().is_some());
        assert!(right.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_authenticated_frames_cross_the_channel() {
        let (mut left, mut right) = framed_pair();
        let key = SessionKey::generate();
        left.authenticate(&key, "c", "s", Side::Client).unwrap();
        right.authenticate(&key, "c", "s", Side::Server).unwrap();

        left.send_control(Message::Heartbeat { timestamp: 3 }).await.unwrap();
        right.send_control(Message::HeartbeatAck { timestamp: 3 }).await.unwrap();

        assert_eq!(
            right.recv().await.unwrap().unwrap().message,
            Message::Heartbeat { timestamp: 3 }
        );
        assert_eq!(
            left.recv().await.unwrap().unwrap().message,
            Message::HeartbeatAck { timestamp: 3 }
        );
    }

    #[tokio::test]
    async fn test_unauthenticated_sender_rejected() {
        let (mut left, mut right) = framed_pair();
        right
            .authenticate(&SessionKey::generate(), "c", "s", Side::Server)
            .unwrap();

        // Untagged frames; the receiver reads the later ones as the first one's tag
        for _ in 0..5 {
            left.send_control(Message::Goodbye).await.unwrap();
        }

        assert!(matches!(
            right.recv().await,
            Err(SessionError::Protocol(
                tether_protocol::ProtocolError::FrameAuthentication
            ))
        ));
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_error() {
        let (raw, other) = duplex(4096);
        let (r, w) = split(other);
        let mut framed = FramedChannel::new(Box::new(StreamChannel::new(r, w, "partial")));

        let mut raw = raw;
        // Header promising 10 payload bytes, then only 2
        raw.write_all(&[0, 0, 0, 0, 0x08, 0, 0, 10, 1, 2]).await.unwrap();
        drop(raw);

        assert!(matches!(framed.recv().await, Err(SessionError::UnexpectedClose)));
    }
}
