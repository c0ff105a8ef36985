//! Stream-backed channel
//!
//! Adapts a read half and a write half (plus, for transports, the owning
//! child process) into a [`Channel`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use super::{ProcessChannel, StdioChannel, TcpChannel};
use crate::error::{ChannelError, ConnectionError};
use crate::traits::Channel;

/// How long close waits for buffered output to drain
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a process gets to exit on its own once its stdin is closed
const EXIT_GRACE: Duration = Duration::from_millis(250);

/// How long close waits for a killed process to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle that closes a channel from another task
///
/// Any read or write blocked on the channel returns `ChannelError::Closed`
/// and the channel releases its halves and process.
#[derive(Debug, Clone)]
pub struct ChannelCloser {
    token: CancellationToken,
}

impl ChannelCloser {
    /// Request the channel to close
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Whether close has been requested
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A [`Channel`] over an async read half and write half
pub struct StreamChannel<R, W> {
    reader: Option<R>,
    writer: Option<W>,
    /// Transport process owning the other ends of the halves
    child: Option<Child>,
    peer: String,
    blocking: bool,
    cancel: CancellationToken,
    closed: bool,
}

impl<R, W> StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a blocking channel over the given halves
    pub fn new(reader: R, writer: W, peer: impl Into<String>) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
            child: None,
            peer: peer.into(),
            blocking: true,
            cancel: CancellationToken::new(),
            closed: false,
        }
    }

    /// Attach the process to terminate when the channel closes
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// Handle for closing this channel from another task
    pub fn closer(&self) -> ChannelCloser {
        ChannelCloser {
            token: self.cancel.clone(),
        }
    }

    /// OS id of the owned process, while it is still owned
    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();

        if let Some(mut writer) = self.writer.take() {
            match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Ignoring error closing output to {}: {}", self.peer, e),
                Err(_) => tracing::debug!("Timed out flushing output to {}", self.peer),
            }
        }
        self.reader.take();

        if let Some(mut child) = self.child.take() {
            if let Ok(Ok(status)) = tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                tracing::debug!("Transport for {} exited: {}", self.peer, status);
                return;
            }
            if let Err(e) = child.start_kill() {
                tracing::debug!("Ignoring error killing transport for {}: {}", self.peer, e);
            }
            match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("Transport for {} terminated: {}", self.peer, status),
                Ok(Err(e)) => tracing::warn!("Failed to reap transport for {}: {}", self.peer, e),
                Err(_) => tracing::warn!("Transport for {} did not exit after kill", self.peer),
            }
        }
    }
}

impl ProcessChannel {
    /// Take the piped stdin/stdout of a spawned transport
    pub fn from_child(mut child: Child, peer: impl Into<String>) -> Result<Self, ConnectionError> {
        let peer = peer.into();
        let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
            return Err(ConnectionError::MissingStdio(peer));
        };
        Ok(Self::new(stdout, stdin, peer).with_child(child))
    }
}

impl StdioChannel {
    /// Channel over this process's stdin (read) and stdout (write)
    pub fn stdio(peer: impl Into<String>) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), peer)
    }
}

impl TcpChannel {
    /// Connect to `address` (host:port)
    pub async fn connect(address: &str) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| ConnectionError::Connect {
                address: address.to_string(),
                source,
            })?;
        Ok(Self::from_stream(stream, address))
    }

    /// Wrap an accepted or connected socket
    pub fn from_stream(stream: TcpStream, peer: impl Into<String>) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, peer)
    }
}

async fn write_and_flush<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> std::io::Result<usize> {
    let n = writer.write(data).await?;
    writer.flush().await?;
    Ok(n)
}

#[async_trait]
impl<R, W> Channel for StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, max: usize) -> Result<Bytes, ChannelError> {
        if self.is_closed() {
            self.shutdown().await;
            return Err(ChannelError::Closed);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(ChannelError::Closed);
        };

        let mut buf = BytesMut::zeroed(max);
        let result = if self.blocking {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                r = reader.read(&mut buf[..]) => Some(r),
            }
        } else {
            match reader.read(&mut buf[..]).now_or_never() {
                Some(r) => Some(r),
                None => return Err(ChannelError::WouldBlock),
            }
        };

        match result {
            Some(Ok(n)) => {
                buf.truncate(n);
                Ok(buf.freeze())
            }
            Some(Err(e)) => Err(ChannelError::Io(e)),
            None => {
                self.shutdown().await;
                Err(ChannelError::Closed)
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        if self.is_closed() {
            self.shutdown().await;
            return Err(ChannelError::Closed);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(ChannelError::Closed);
        };

        if !self.blocking {
            return match writer.write(data).now_or_never() {
                Some(Ok(n)) => {
                    // Unflushed bytes go out with the next blocking write
                    let _ = writer.flush().now_or_never();
                    Ok(n)
                }
                Some(Err(e)) => Err(ChannelError::Io(e)),
                None => Err(ChannelError::WouldBlock),
            };
        }

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            r = write_and_flush(writer, data) => Some(r),
        };

        match result {
            Some(r) => Ok(r?),
            None => {
                self.shutdown().await;
                Err(ChannelError::Closed)
            }
        }
    }

    async fn close(&mut self) {
        self.shutdown().await;
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn is_closed(&self) -> bool {
        self.closed || self.cancel.is_cancelled()
    }

    fn peer_name(&self) -> &str {
        &self.peer
    }
}

impl<R, W> Drop for StreamChannel<R, W> {
    fn drop(&mut self) {
        // tokio reaps the orphan in the background
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}
