//! Channel trait

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ChannelError;

/// Consecutive zero-byte writes `write_all` tolerates before giving up
pub const MAX_ZERO_WRITES: usize = 8;

/// First and longest pause after a non-blocking write would block
const WOULD_BLOCK_BACKOFF: (Duration, Duration) = (Duration::from_millis(1), Duration::from_millis(50));

/// A duplex byte stream with a socket-like contract
///
/// Implemented over process pipes, the agent's own stdio and TCP sockets,
/// so everything above it is transport-agnostic. A channel is driven by a
/// single task; cancellation from elsewhere goes through a
/// [`ChannelCloser`](crate::channel::ChannelCloser).
#[async_trait]
pub trait Channel: Send {
    /// One read of at most `max` bytes
    ///
    /// Returns whatever is available, possibly fewer bytes than asked for.
    /// An empty result means the peer closed its end.
    async fn read(&mut self, max: usize) -> Result<Bytes, ChannelError>;

    /// One write attempt; may accept fewer bytes than given
    async fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError>;

    /// Write every byte of `data`, looping over short writes
    ///
    /// In non-blocking mode a write that would block is retried after a
    /// short, growing pause until the peer drains. A run of
    /// [`MAX_ZERO_WRITES`] writes that accept nothing fails with `Stalled`.
    async fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let mut remaining = data;
        let mut zero_writes = 0;
        let (first_pause, max_pause) = WOULD_BLOCK_BACKOFF;
        let mut pause = first_pause;

        while !remaining.is_empty() {
            let written = match self.write(remaining).await {
                Ok(n) => n,
                Err(ChannelError::WouldBlock) => {
                    tokio::time::sleep(pause).await;
                    pause = (pause * 2).min(max_pause);
                    continue;
                }
                Err(e) => return Err(e),
            };
            pause = first_pause;

            if written == 0 {
                zero_writes += 1;
                if zero_writes >= MAX_ZERO_WRITES {
                    return Err(ChannelError::Stalled {
                        attempts: zero_writes,
                    });
                }
                tokio::task::yield_now().await;
                continue;
            }

            zero_writes = 0;
            remaining = &remaining[written..];
        }

        Ok(())
    }

    /// Release both halves and terminate the owned process, if any
    ///
    /// Never fails; calling it again is a no-op.
    async fn close(&mut self);

    /// Switch between blocking and non-blocking reads/writes
    fn set_blocking(&mut self, blocking: bool);

    /// Current blocking mode
    fn is_blocking(&self) -> bool;

    /// Whether `close` has run (or a closer fired)
    fn is_closed(&self) -> bool;

    /// Diagnostic label for the other end
    fn peer_name(&self) -> &str;
}
