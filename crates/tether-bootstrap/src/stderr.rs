//! Transport stderr capture
//!
//! The transport's stderr is drained for the whole life of the process
//! (a full pipe would stall it). Each line is logged at debug and the most
//! recent ones are kept so a failed bootstrap can say why, e.g.
//! `Permission denied (publickey).`

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;

/// Longest stderr line kept; the rest of a longer line is dropped
pub const MAX_LINE: usize = 4096;

/// The last lines a transport wrote to stderr
#[derive(Debug, Default)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    reader: Option<JoinHandle<()>>,
}

impl StderrTail {
    /// A tail with nothing behind it
    pub fn empty() -> Self {
        Self::default()
    }

    /// Drain `stream` in the background, keeping the last `capacity` lines
    pub fn capture<R>(stream: R, peer: impl Into<String>, capacity: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let lines = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let sink = Arc::clone(&lines);
        let peer = peer.into();

        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            let mut overlong = false;
            loop {
                buf.clear();
                match (&mut reader).take(MAX_LINE as u64).read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let skip = overlong;
                        overlong = buf.last() != Some(&b'\n');
                        if skip {
                            continue;
                        }
                        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        tracing::debug!("[{} stderr] {}", peer, line);
                        if capacity == 0 {
                            continue;
                        }
                        let mut lines = sink.lock().unwrap_or_else(|e| e.into_inner());
                        if lines.len() == capacity {
                            lines.pop_front();
                        }
                        lines.push_back(line);
                    }
                    Err(e) => {
                        tracing::debug!("Stopped reading stderr of {}: {}", peer, e);
                        break;
                    }
                }
            }
        });

        Self {
            lines,
            reader: Some(reader),
        }
    }

    /// Lines captured so far, oldest first
    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    /// Wait up to `wait` for the stream to end, then return the lines
    ///
    /// Used after the process died, when its last words may still be in
    /// the pipe.
    pub async fn finish(&mut self, wait: Duration) -> Vec<String> {
        if let Some(reader) = self.reader.take() {
            if tokio::time::timeout(wait, reader).await.is_err() {
                tracing::debug!("stderr still open after {:?}", wait);
            }
        }
        self.lines()
    }
}
