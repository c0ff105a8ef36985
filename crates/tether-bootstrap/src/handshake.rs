//! Handshake synchronizer
//!
//! Everything a transport prints before the loader runs (login banners,
//! motd, shell warnings) is noise. The loader prints the handshake
//! signature before reading anything, so the first occurrence of the
//! signature marks the start of the protocol stream.
//!
//! Reads are sized so that no byte after the signature is consumed: with
//! `k` bytes of the accumulator already matching a prefix of the
//! signature, the earliest the signature can complete is `L - k` bytes
//! later, so that is the most a single read asks for.

use std::time::{Duration, Instant};

use tether_core::config::BootstrapConfig;
use tether_core::{BootstrapError, Channel};
use tether_protocol::HandshakeSignature;

/// Bounds on the wait for the signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeLimits {
    /// Total time allowed
    pub timeout: Duration,
    /// Noise bytes allowed before the signature
    pub max_noise_bytes: usize,
}

impl Default for HandshakeLimits {
    fn default() -> Self {
        Self::from(&BootstrapConfig::default())
    }
}

impl From<&BootstrapConfig> for HandshakeLimits {
    fn from(config: &BootstrapConfig) -> Self {
        Self {
            timeout: config.handshake_timeout,
            max_noise_bytes: config.max_noise_bytes,
        }
    }
}

/// What the synchronizer saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReport {
    /// Bytes discarded before the signature
    pub noise_bytes: usize,
    /// Time until the signature completed
    pub elapsed: Duration,
}

/// Read from `channel` until `signature` has been seen
///
/// On success the channel is positioned just past the signature.
pub async fn synchronize(
    channel: &mut dyn Channel,
    signature: &HandshakeSignature,
    limits: &HandshakeLimits,
) -> Result<HandshakeReport, BootstrapError> {
    let started = Instant::now();
    let expected = signature.as_bytes();
    let mut seen = Vec::new();

    let result = tokio::time::timeout(
        limits.timeout,
        read_until(channel, expected, limits.max_noise_bytes, &mut seen),
    )
    .await;

    match result {
        Ok(Ok(())) => {
            let noise = &seen[..seen.len() - expected.len()];
            if !noise.is_empty() {
                tracing::debug!(
                    "Discarded {} bytes before handshake: {:?}",
                    noise.len(),
                    String::from_utf8_lossy(noise)
                );
            }
            Ok(HandshakeReport {
                noise_bytes: noise.len(),
                elapsed: started.elapsed(),
            })
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BootstrapError::Timeout {
            waited: limits.timeout,
            noise_bytes: seen.len() - pending_prefix_len(&seen, expected),
        }),
    }
}

async fn read_until(
    channel: &mut dyn Channel,
    expected: &[u8],
    max_noise: usize,
    seen: &mut Vec<u8>,
) -> Result<(), BootstrapError> {
    let started = Instant::now();
    loop {
        if seen.ends_with(expected) {
            return Ok(());
        }

        let matched = pending_prefix_len(seen, expected);
        let noise = seen.len() - matched;
        if noise > max_noise {
            return Err(BootstrapError::Timeout {
                waited: started.elapsed(),
                noise_bytes: noise,
            });
        }

        let chunk = channel
            .read(expected.len() - matched)
            .await
            .map_err(BootstrapError::Handshake)?;
        if chunk.is_empty() {
            tracing::debug!("Transport output ended after {} bytes without a handshake", seen.len());
            return Err(BootstrapError::TransportExited { stderr: Vec::new() });
        }
        seen.extend_from_slice(&chunk);
    }
}

/// Length of the longest suffix of `seen` that is a proper prefix of `expected`
fn pending_prefix_len(seen: &[u8], expected: &[u8]) -> usize {
    (1..expected.len())
        .rev()
        .find(|&k| seen.ends_with(&expected[..k]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use tether_core::ChannelError;

    /// Serves queued bytes in chunks of at most `chunk`, recording each request
    struct Queued {
        data: VecDeque<u8>,
        chunk: usize,
        requests: Vec<usize>,
        fail: bool,
    }

    impl Queued {
        fn new(data: &[u8], chunk: usize) -> Self {
            Self {
                data: data.iter().copied().collect(),
                chunk,
                requests: Vec::new(),
                fail: false,
            }
        }

        fn remaining(&self) -> Vec<u8> {
            self.data.iter().copied().collect()
        }
    }

    #[async_trait]
    impl Channel for Queued {
        async fn read(&mut self, max: usize) -> Result<Bytes, ChannelError> {
            self.requests.push(max);
            if self.fail {
                return Err(ChannelError::Io(std::io::Error::other("boom")));
            }
            let n = max.min(self.chunk).min(self.data.len());
            Ok(self.data.drain(..n).collect::<Vec<u8>>().into())
        }

        async fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
            Ok(data.len())
        }

        async fn close(&mut self) {}

        fn set_blocking(&mut self, _blocking: bool) {}

        fn is_blocking(&self) -> bool {
            true
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn peer_name(&self) -> &str {
            "queued"
        }
    }

    fn signature() -> HandshakeSignature {
        HandshakeSignature::from_bytes(*b"Xk3vQ9aZ").unwrap()
    }

    #[tokio::test]
    async fn test_stops_exactly_after_signature() {
        let garbage: Vec<u8> = (0..37u8).map(|i| b'a' + (i % 26)).collect();
        let mut stream = garbage.clone();
        stream.extend_from_slice(b"Xk3vQ9aZ");
        stream.extend_from_slice(b"MODULEBYTES");

        let mut channel = Queued::new(&stream, 64);
        let report = synchronize(&mut channel, &signature(), &HandshakeLimits::default())
            .await
            .unwrap();

        assert_eq!(report.noise_bytes, 37);
        assert_eq!(channel.remaining(), b"MODULEBYTES");
        assert!(channel.requests.iter().all(|&n| n <= 8));
    }

    #[tokio::test]
    async fn test_partial_prefix_in_noise() {
        // "Xk3v" looks like the start of the signature, then diverges
        let stream = b"Xk3vXk3vQ9aZtail";
        let mut channel = Queued::new(stream, 3);
        let report = synchronize(&mut channel, &signature(), &HandshakeLimits::default())
            .await
            .unwrap();

        assert_eq!(report.noise_bytes, 4);
        assert_eq!(channel.remaining(), b"tail");
    }

    #[tokio::test]
    async fn test_signature_alone() {
        let mut channel = Queued::new(b"Xk3vQ9aZ", 1);
        let report = synchronize(&mut channel, &signature(), &HandshakeLimits::default())
            .await
            .unwrap();
        assert_eq!(report.noise_bytes, 0);
        assert!(channel.remaining().is_empty());
    }

    #[tokio::test]
    async fn test_eof_before_signature() {
        let mut channel = Queued::new(b"Last login: yesterday\nXk3v", 64);
        let err = synchronize(&mut channel, &signature(), &HandshakeLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::TransportExited { .. }));
    }

    #[tokio::test]
    async fn test_noise_limit() {
        let noise = vec![b'#'; 200];
        let mut channel = Queued::new(&noise, 64);
        let limits = HandshakeLimits {
            max_noise_bytes: 100,
            ..HandshakeLimits::default()
        };

        let err = synchronize(&mut channel, &signature(), &limits).await.unwrap_err();
        match err {
            BootstrapError::Timeout { noise_bytes, .. } => assert!(noise_bytes > 100),
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_error() {
        let mut channel = Queued::new(b"", 8);
        channel.fail = true;
        let err = synchronize(&mut channel, &signature(), &HandshakeLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Handshake(ChannelError::Io(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        use tether_core::StreamChannel;

        let (local, _remote) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(local);
        let mut channel = StreamChannel::new(r, w, "silent");
        let limits = HandshakeLimits {
            timeout: Duration::from_secs(30),
            max_noise_bytes: 1024,
        };

        let err = synchronize(&mut channel, &signature(), &limits).await.unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Timeout { waited, noise_bytes: 0 } if waited == Duration::from_secs(30)
        ));
    }

    #[test]
    fn test_pending_prefix_len() {
        let sig = b"abcab";
        assert_eq!(pending_prefix_len(b"xxab", sig), 2);
        assert_eq!(pending_prefix_len(b"xxabca", sig), 4);
        assert_eq!(pending_prefix_len(b"xxx", sig), 0);
        assert_eq!(pending_prefix_len(b"", sig), 0);
    }
}
