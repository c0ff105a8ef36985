//! Per-frame authentication
//!
//! Once a session is welcomed, every frame carries a 32-byte HMAC-SHA256
//! tag after its payload. Each direction keeps one running HMAC keyed by
//! the session key and seeded with both handshake nonces, so a tag covers
//! the frame and everything sent before it in that direction. Altered,
//! dropped, reordered, replayed or reflected frames all fail the check.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ProtocolError;
use crate::secret::SessionKey;

type HmacSha256 = Hmac<Sha256>;

/// Length of the tag appended to each frame
pub const TAG_LEN: usize = 32;

/// Which end of a session is sending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    /// The other end
    pub fn peer(self) -> Self {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }

    fn label(self) -> &'static [u8] {
        match self {
            Side::Client => b"tether client->server",
            Side::Server => b"tether server->client",
        }
    }
}

/// Running MAC over the frames one side sends
#[derive(Clone)]
pub struct FrameMac {
    state: HmacSha256,
}

impl FrameMac {
    /// MAC for frames sent by `sender` in the session opened with these nonces
    pub fn new(
        key: &SessionKey,
        client_nonce: &str,
        server_nonce: &str,
        sender: Side,
    ) -> Result<Self, ProtocolError> {
        let mut state = HmacSha256::new_from_slice(key.expose().as_bytes())
            .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        state.update(sender.label());
        for nonce in [client_nonce, server_nonce] {
            state.update(&(nonce.len() as u32).to_be_bytes());
            state.update(nonce.as_bytes());
        }
        Ok(Self { state })
    }

    /// Absorb one frame and return its tag
    pub fn seal(&mut self, header: &[u8], payload: &[u8]) -> [u8; TAG_LEN] {
        self.state.update(header);
        self.state.update(payload);
        let digest = self.state.clone().finalize().into_bytes();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&digest);
        tag
    }

    /// Absorb one received frame and check its tag in constant time
    pub fn check(&mut self, header: &[u8], payload: &[u8], tag: &[u8]) -> bool {
        self.state.update(header);
        self.state.update(payload);
        self.state.clone().verify_slice(tag).is_ok()
    }
}

impl fmt::Debug for FrameMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FrameMac(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(key: &SessionKey) -> (FrameMac, FrameMac) {
        (
            FrameMac::new(key, "c-nonce", "s-nonce", Side::Client).unwrap(),
            FrameMac::new(key, "c-nonce", "s-nonce", Side::Client).unwrap(),
        )
    }

    #[test]
    fn test_matching_state_accepts() {
        let key = SessionKey::generate();
        let (mut sender, mut receiver) = pair(&key);

        for payload in [&b"one"[..], b"two", b""] {
            let tag = sender.seal(b"hdr", payload);
            assert!(receiver.check(b"hdr", payload, &tag));
        }
    }

    #[test]
    fn test_tags_chain_over_earlier_frames() {
        let key = SessionKey::generate();
        let (mut sender, mut receiver) = pair(&key);

        let _first = sender.seal(b"hdr", b"first");
        let second = sender.seal(b"hdr", b"second");
        // Receiver never saw the first frame
        assert!(!receiver.check(b"hdr", b"second", &second));
    }

    #[test]
    fn test_direction_and_nonces_separate_streams() {
        let key = SessionKey::generate();
        let mut client = FrameMac::new(&key, "a", "b", Side::Client).unwrap();
        let mut server = FrameMac::new(&key, "a", "b", Side::Server).unwrap();
        let mut other_session = FrameMac::new(&key, "a", "c", Side::Client).unwrap();

        let tag = client.seal(b"hdr", b"data");
        assert!(!server.check(b"hdr", b"data", &tag));
        assert!(!other_session.check(b"hdr", b"data", &tag));
    }

    #[test]
    fn test_wrong_key_rejects() {
        let mut sender = FrameMac::new(&SessionKey::generate(), "a", "b", Side::Server).unwrap();
        let mut receiver = FrameMac::new(&SessionKey::generate(), "a", "b", Side::Server).unwrap();

        let tag = sender.seal(b"hdr", b"data");
        assert!(!receiver.check(b"hdr", b"data", &tag));
    }
}
