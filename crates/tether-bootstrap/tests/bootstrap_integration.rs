//! Bootstrapper end to end, against in-memory and real shell transports

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tether_bootstrap::{Bootstrapper, CommandTransport, LocalTransport, Spawned, StderrTail, Transport};
use tether_core::config::{BootstrapConfig, HostProfile};
use tether_core::{BootstrapError, Channel, ChannelError, ConnectionError, StreamChannel};
use tether_protocol::{BootstrapModule, BootstrapPackage, LoaderScript};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Records whether `close` was called on the wrapped channel
struct Tracked {
    inner: Box<dyn Channel>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Channel for Tracked {
    async fn read(&mut self, max: usize) -> Result<Bytes, ChannelError> {
        self.inner.read(max).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        self.inner.write(data).await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close().await;
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.inner.set_blocking(blocking);
    }

    fn is_blocking(&self) -> bool {
        self.inner.is_blocking()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn peer_name(&self) -> &str {
        self.inner.peer_name()
    }
}

#[derive(Debug)]
struct RemoteLog {
    /// Bytes that arrived before the signature was written
    early: usize,
    /// Everything after the signature
    received: Vec<u8>,
}

#[derive(Clone, Copy)]
enum Remote {
    /// Banner, signature, then read the whole package
    Loader { banner_len: usize },
    /// Banner, then hang up
    HangUp,
    /// Signature, then hang up before reading any module
    HangUpAfterSignature,
}

/// A transport whose "remote host" is a task on the far end of a duplex
struct MockTransport {
    remote: Remote,
    closed: Arc<AtomicBool>,
    log: mpsc::UnboundedSender<RemoteLog>,
}

impl MockTransport {
    fn new(remote: Remote) -> (Self, Arc<AtomicBool>, mpsc::UnboundedReceiver<RemoteLog>) {
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                remote,
                closed: Arc::clone(&closed),
                log: tx,
            },
            closed,
            rx,
        )
    }
}

async fn run_remote(mut stream: DuplexStream, remote: Remote, script: LoaderScript, log: mpsc::UnboundedSender<RemoteLog>) {
    let banner_len = match remote {
        Remote::Loader { banner_len } => banner_len,
        Remote::HangUp => 37,
        Remote::HangUpAfterSignature => 0,
    };
    let banner: Vec<u8> = b"Welcome to build-01! Last login: Mon\n"
        .iter()
        .copied()
        .cycle()
        .take(banner_len)
        .collect();
    stream.write_all(&banner).await.unwrap();

    match remote {
        Remote::HangUp => return,
        Remote::HangUpAfterSignature => {
            stream.write_all(script.signature().as_bytes()).await.unwrap();
            return;
        }
        Remote::Loader { .. } => {}
    }

    // Nothing may arrive before the signature is out
    let mut peek = [0u8; 64];
    let early = match tokio::time::timeout(Duration::from_millis(50), stream.read(&mut peek)).await {
        Ok(Ok(n)) => n,
        Ok(Err(_)) | Err(_) => 0,
    };

    stream.write_all(script.signature().as_bytes()).await.unwrap();

    let mut received = vec![0u8; script.manifest().total_len()];
    stream.read_exact(&mut received).await.unwrap();
    let _ = log.send(RemoteLog { early, received });
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn spawn(&self, _target: &HostProfile, script: &LoaderScript) -> Result<Spawned, ConnectionError> {
        let (local, remote) = tokio::io::duplex(1024);
        tokio::spawn(run_remote(remote, self.remote, script.clone(), self.log.clone()));

        let (r, w) = tokio::io::split(local);
        Ok(Spawned {
            channel: Box::new(Tracked {
                inner: Box::new(StreamChannel::new(r, w, "mock:build-01")),
                closed: Arc::clone(&self.closed),
            }),
            stderr: StderrTail::empty(),
        })
    }
}

fn sample_package() -> BootstrapPackage {
    BootstrapPackage::build(vec![
        BootstrapModule::new("core", vec![b'c'; 4000]),
        BootstrapModule::new("server", (0..3000u32).map(|i| (i * 7 % 256) as u8).collect::<Vec<u8>>()),
        BootstrapModule::new("ssh", b"#!/bin/sh\nexit 0\n".to_vec()),
    ])
    .unwrap()
}

#[tokio::test]
async fn test_mock_banner_then_modules() {
    let (transport, closed, mut log) = MockTransport::new(Remote::Loader { banner_len: 37 });
    let package = sample_package();
    let expected: Vec<u8> = package
        .modules()
        .iter()
        .flat_map(|m| m.payload().iter().copied())
        .collect();

    let bootstrapper = Bootstrapper::new(Box::new(transport), package, BootstrapConfig::default());
    let done = bootstrapper.bootstrap(&HostProfile::new("build-01")).await.unwrap();

    assert_eq!(done.report.noise_bytes, 37);
    assert_eq!(done.peer, "mock:build-01");
    assert_eq!(done.key.expose().len(), 64);
    assert!(!closed.load(Ordering::SeqCst));

    let remote = log.recv().await.unwrap();
    assert_eq!(remote.early, 0, "module bytes were sent before the signature");
    assert_eq!(remote.received, expected);
}

#[tokio::test]
async fn test_mock_eof_mid_handshake_closes_channel() {
    let (transport, closed, _log) = MockTransport::new(Remote::HangUp);
    let bootstrapper = Bootstrapper::new(Box::new(transport), sample_package(), BootstrapConfig::default());

    let err = bootstrapper.bootstrap(&HostProfile::new("build-01")).await.unwrap_err();

    assert!(matches!(err, BootstrapError::TransportExited { .. }));
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_remote_gone_during_transfer_closes_channel() {
    let (transport, closed, _log) = MockTransport::new(Remote::HangUpAfterSignature);
    // Larger than the pipe buffer so the write is still pending when the remote drops
    let package = BootstrapPackage::build(vec![BootstrapModule::new("agent", vec![b'a'; 64 * 1024])]).unwrap();
    let bootstrapper = Bootstrapper::new(Box::new(transport), package, BootstrapConfig::default());

    let err = bootstrapper.bootstrap(&HostProfile::new("build-01")).await.unwrap_err();

    match err {
        BootstrapError::Transfer { module, .. } => assert_eq!(module, "agent"),
        other => panic!("expected a transfer error, got {:?}", other),
    }
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_fresh_secrets_per_attempt() {
    let (transport, _closed, _log) = MockTransport::new(Remote::Loader { banner_len: 0 });
    let bootstrapper = Bootstrapper::new(Box::new(transport), sample_package(), BootstrapConfig::default());
    let target = HostProfile::new("build-01");

    let first = bootstrapper.bootstrap(&target).await.unwrap();
    let second = bootstrapper.bootstrap(&target).await.unwrap();
    assert_ne!(first.key, second.key);
}

fn has_tools() -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg("command -v gzip && command -v dd && command -v mktemp")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

async fn read_to_end(channel: &mut dyn Channel) -> String {
    let mut out = Vec::new();
    loop {
        let chunk = channel.read(4096).await.unwrap();
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_local_shell_loads_modules_in_order() {
    if !has_tools() {
        eprintln!("skipping: gzip/dd/mktemp not available");
        return;
    }

    let package = BootstrapPackage::build(vec![
        BootstrapModule::new("core", b"#!/bin/sh\necho core\n".to_vec()),
        BootstrapModule::new("server", b"#!/bin/sh\necho \"server+$(core)\"\n".to_vec()),
        BootstrapModule::new(
            "ssh",
            br#"#!/bin/sh
printf '%s;%s;%s;%s;%s;%s\n' "$(core)" "$(server)" "$TETHER_PEER" "$1" "$TETHER_SESSION_KEY" "$TETHER_STAGE"
"#
            .to_vec(),
        ),
    ])
    .unwrap();

    let bootstrapper = Bootstrapper::new(Box::new(LocalTransport::new()), package, BootstrapConfig::default());
    let mut done = bootstrapper.bootstrap(&HostProfile::new("localhost")).await.unwrap();

    let output = read_to_end(done.channel.as_mut()).await;
    let fields: Vec<&str> = output.trim_end().split(';').collect();
    assert_eq!(fields.len(), 6, "unexpected output: {:?}", output);
    assert_eq!(fields[0], "core");
    assert_eq!(fields[1], "server+core");
    assert_eq!(fields[2], "local");
    assert_eq!(fields[3], "serve");
    assert_eq!(fields[4], done.key.expose());
    assert!(!Path::new(fields[5]).exists(), "staging directory left behind");

    done.channel.close().await;
}

#[tokio::test]
async fn test_transport_exit_reports_stderr() {
    let transport = CommandTransport::new(vec![
        "sh".into(),
        "-c".into(),
        "echo 'Permission denied (publickey).' >&2; exit 255".into(),
    ]);
    let bootstrapper = Bootstrapper::new(Box::new(transport), sample_package(), BootstrapConfig::default());

    let err = bootstrapper.bootstrap(&HostProfile::new("locked")).await.unwrap_err();
    match err {
        BootstrapError::TransportExited { stderr } => {
            assert_eq!(stderr, vec!["Permission denied (publickey).".to_string()]);
        }
        other => panic!("expected TransportExited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transport_clean_exit() {
    let transport = CommandTransport::new(vec!["sh".into(), "-c".into(), "exit 0".into()]);
    let bootstrapper = Bootstrapper::new(Box::new(transport), sample_package(), BootstrapConfig::default());
    let err = bootstrapper.bootstrap(&HostProfile::new("quiet")).await.unwrap_err();
    assert!(matches!(err, BootstrapError::TransportExited { stderr } if stderr.is_empty()));
}

#[tokio::test]
async fn test_missing_tool_aborts_before_signature() {
    let transport = CommandTransport::new(vec![
        "env".into(),
        "PATH=/nonexistent".into(),
        "/bin/sh".into(),
        "-c".into(),
        "{script}".into(),
    ]);
    let bootstrapper = Bootstrapper::new(Box::new(transport), sample_package(), BootstrapConfig::default());

    let err = bootstrapper.bootstrap(&HostProfile::new("bare")).await.unwrap_err();
    match err {
        BootstrapError::TransportExited { stderr } => {
            assert_eq!(stderr, vec!["tether: missing dd".to_string()]);
        }
        other => panic!("expected TransportExited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_silent_transport_times_out() {
    let transport = CommandTransport::new(vec!["sh".into(), "-c".into(), "echo banner; exec sleep 30".into()]);
    let config = BootstrapConfig {
        handshake_timeout: Duration::from_millis(300),
        ..BootstrapConfig::default()
    };
    let bootstrapper = Bootstrapper::new(Box::new(transport), sample_package(), config);

    let started = Instant::now();
    let err = bootstrapper.bootstrap(&HostProfile::new("slow")).await.unwrap_err();

    assert!(matches!(err, BootstrapError::Timeout { noise_bytes: 7, .. }), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(10));
}
