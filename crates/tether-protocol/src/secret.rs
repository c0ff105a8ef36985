//! Per-bootstrap secrets: the handshake signature and the session key
//!
//! Both are generated fresh for every bootstrap attempt and embedded in
//! the loader script text. The signature is echoed back by the running
//! loader so the local side can tell protocol output from transport
//! noise. The key is handed to the remote entry point and later proven
//! by the client in its `Hello`.

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;

/// Length of the handshake signature in bytes
pub const SIGNATURE_LEN: usize = 8;

/// Length of the session key in bytes (before hex encoding)
const KEY_BYTES: usize = 32;

/// Random nonce the remote loader prints before anything else
///
/// Drawn from the ASCII alphanumeric alphabet so the loader can echo it
/// verbatim without any escaping.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeSignature([u8; SIGNATURE_LEN]);

impl HandshakeSignature {
    /// Generate a fresh signature
    pub fn generate() -> Self {
        let mut bytes = [0u8; SIGNATURE_LEN];
        for (slot, byte) in bytes.iter_mut().zip(rand::thread_rng().sample_iter(Alphanumeric)) {
            *slot = byte;
        }
        Self(bytes)
    }

    /// Build a signature from known bytes
    ///
    /// Returns None unless every byte is ASCII alphanumeric.
    pub fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Option<Self> {
        bytes
            .iter()
            .all(u8::is_ascii_alphanumeric)
            .then_some(Self(bytes))
    }

    /// Raw signature bytes, as they appear on the wire
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Signature as text (always valid ASCII)
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Debug for HandshakeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandshakeSignature").field(&self.as_str()).finish()
    }
}

/// Shared secret handed to the remote entry point
///
/// Travels only inside the loader script, which is the transport's
/// command argument; it is never written to the data channel.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(String);

impl SessionKey {
    /// Generate a new random key (64 hex characters)
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_BYTES];
        rand::thread_rng().fill(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parse a key from its hex form
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let text = text.trim();
        let decoded = hex::decode(text).map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        if decoded.len() != KEY_BYTES {
            return Err(ProtocolError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_BYTES,
                decoded.len()
            )));
        }
        Ok(Self(text.to_ascii_lowercase()))
    }

    /// Hex form of the key
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Proof of key possession bound to a nonce: hex(SHA-256(key || nonce))
    pub fn proof(&self, nonce: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hasher.update(nonce.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check a proof produced by the peer
    pub fn verify(&self, nonce: &str, proof: &str) -> bool {
        let expected = self.proof(nonce);
        // Constant-time comparison over equal-length hex strings
        expected.len() == proof.len()
            && expected
                .bytes()
                .zip(proof.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Generate a random hex nonce for a `Hello`
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}
