//! Client role
//!
//! ```text
//! ClientHello -> AwaitWelcome -> StartExec -> StreamOutput* -> SayGoodbye
//!                             \-> SendPing -> AwaitAck --------/
//! ```
//!
//! Frames after `Welcome` are authenticated with the session key.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tether_core::time::current_time_millis;
use tether_core::{drive, Channel, FramedChannel, Outcome, Session, SessionError, Step};
use tether_protocol::secret::generate_nonce;
use tether_protocol::{Frame, Message, RequestId, SessionKey, Side, PROTOCOL_VERSION};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Where remote output is copied
pub type OutputSink = Box<dyn AsyncWrite + Unpin + Send>;

/// A command to run on the remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Program and arguments
    pub argv: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: Option<String>,
}

impl ExecRequest {
    /// Run `argv` with the remote defaults
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// What the client asks for after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Run a command and relay its output
    Exec(ExecRequest),
    /// Measure a round trip
    Ping,
}

/// The server's self-description from `Welcome`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Server protocol version
    pub version: String,
    /// Remote hostname
    pub hostname: String,
    /// Remote operating system
    pub os: String,
    /// Remote CPU architecture
    pub arch: String,
}

/// What a client session learned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientReport {
    /// Set once `Welcome` arrives
    pub remote: Option<RemoteInfo>,
    /// Set by a completed ping
    pub round_trip: Option<Duration>,
}

/// Client side of a session
pub struct Client {
    framed: FramedChannel,
    key: SessionKey,
    stdout: OutputSink,
    stderr: OutputSink,
    report: Arc<Mutex<ClientReport>>,
}

impl Client {
    /// Client over a bootstrapped channel, relaying output to this process's stdout/stderr
    pub fn new(channel: Box<dyn Channel>, key: SessionKey) -> Self {
        Self {
            framed: FramedChannel::new(channel),
            key,
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
            report: Arc::new(Mutex::new(ClientReport::default())),
        }
    }

    /// Relay remote output somewhere else
    pub fn with_output(mut self, stdout: OutputSink, stderr: OutputSink) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    /// First state of a session performing `request`
    pub fn into_session(self, request: Request) -> Box<dyn Session> {
        Box::new(ClientHello { client: self, request })
    }

    /// Run the whole session for `request`
    pub async fn run(self, request: Request) -> Result<(Outcome, ClientReport), SessionError> {
        let report = Arc::clone(&self.report);
        let outcome = drive(self.into_session(request)).await?;
        let report = report.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok((outcome, report))
    }

    /// Run a command; the outcome carries its exit code
    pub async fn exec(self, request: ExecRequest) -> Result<(Outcome, ClientReport), SessionError> {
        self.run(Request::Exec(request)).await
    }

    /// Ping the server
    pub async fn ping(self) -> Result<ClientReport, SessionError> {
        let (_, report) = self.run(Request::Ping).await?;
        Ok(report)
    }

    fn record(&self, update: impl FnOnce(&mut ClientReport)) {
        let mut report = self.report.lock().unwrap_or_else(|e| e.into_inner());
        update(&mut report);
    }

    async fn recv(&mut self) -> Result<Frame, SessionError> {
        self.framed.recv().await?.ok_or(SessionError::UnexpectedClose)
    }
}

fn unexpected(state: &'static str, message: &Message) -> SessionError {
    SessionError::UnexpectedMessage {
        state,
        message: format!("{:?}", message.message_type()),
    }
}

struct ClientHello {
    client: Client,
    request: Request,
}

#[async_trait]
impl Session for ClientHello {
    fn name(&self) -> &'static str {
        "client_hello"
    }

    async fn run(mut self: Box<Self>) -> Result<Step, SessionError> {
        let nonce = generate_nonce();
        let proof = self.client.key.proof(&nonce);
        self.client
            .framed
            .send_control(Message::Hello {
                version: PROTOCOL_VERSION.to_string(),
                nonce: nonce.clone(),
                proof,
            })
            .await?;
        let ClientHello { client, request } = *self;
        Ok(Step::next(AwaitWelcome {
            client,
            request,
            nonce,
        }))
    }
}

struct AwaitWelcome {
    client: Client,
    request: Request,
    nonce: String,
}

#[async_trait]
impl Session for AwaitWelcome {
    fn name(&self) -> &'static str {
        "await_welcome"
    }

    async fn run(mut self: Box<Self>) -> Result<Step, SessionError> {
        let frame = self.client.recv().await?;
        match frame.message {
            Message::Welcome {
                version,
                nonce: server_nonce,
                hostname,
                os,
                arch,
            } => {
                let AwaitWelcome {
                    mut client,
                    request,
                    nonce,
                } = *self;
                client
                    .framed
                    .authenticate(&client.key, &nonce, &server_nonce, Side::Client)?;
                tracing::info!(
                    "Connected to {} ({} {}, protocol {})",
                    hostname,
                    os,
                    arch,
                    version
                );
                client.record(|r| {
                    r.remote = Some(RemoteInfo {
                        version,
                        hostname,
                        os,
                        arch,
                    })
                });
                Ok(match request {
                    Request::Exec(request) => Step::next(StartExec { client, request }),
                    Request::Ping => Step::next(SendPing { client }),
                })
            }
            Message::Rejected { reason } => Err(SessionError::Rejected(reason)),
            other => Err(unexpected("await_welcome", &other)),
        }
    }
}

struct StartExec {
    client: Client,
    request: ExecRequest,
}

#[async_trait]
impl Session for StartExec {
    fn name(&self) -> &'static str {
        "start_exec"
    }

    async fn run(self: Box<Self>) -> Result<Step, SessionError> {
        let StartExec { mut client, request } = *self;
        let ExecRequest { argv, env, cwd } = request;
        let id = RequestId::CONTROL.next();
        tracing::debug!("{}: exec {:?}", id, argv);
        client
            .framed
            .send(Frame::new(id, Message::Exec { argv, env, cwd }))
            .await?;
        Ok(Step::next(StreamOutput { client, id }))
    }
}

/// Relays one output frame per step until `Exited`
struct StreamOutput {
    client: Client,
    id: RequestId,
}

#[async_trait]
impl Session for StreamOutput {
    fn name(&self) -> &'static str {
        "stream_output"
    }

    async fn run(mut self: Box<Self>) -> Result<Step, SessionError> {
        let frame = self.client.recv().await?;
        if frame.request_id != self.id {
            tracing::debug!("Ignoring frame for {}", frame.request_id);
            return Ok(Step::Next(self));
        }

        match frame.message {
            Message::Stdout(data) => {
                self.client.stdout.write_all(&data).await?;
                self.client.stdout.flush().await?;
                Ok(Step::Next(self))
            }
            Message::Stderr(data) => {
                self.client.stderr.write_all(&data).await?;
                self.client.stderr.flush().await?;
                Ok(Step::Next(self))
            }
            Message::Exited { code } => {
                tracing::debug!("{}: exited with {:?}", self.id, code);
                Ok(Step::next(SayGoodbye {
                    client: self.client,
                    outcome: Outcome::exited(code),
                }))
            }
            Message::Error { message, .. } => Err(SessionError::Exec(message)),
            other => Err(unexpected("stream_output", &other)),
        }
    }
}

struct SendPing {
    client: Client,
}

#[async_trait]
impl Session for SendPing {
    fn name(&self) -> &'static str {
        "send_ping"
    }

    async fn run(mut self: Box<Self>) -> Result<Step, SessionError> {
        let timestamp = current_time_millis();
        let started = Instant::now();
        self.client
            .framed
            .send_control(Message::Heartbeat { timestamp })
            .await?;
        Ok(Step::next(AwaitAck {
            client: self.client,
            timestamp,
            started,
        }))
    }
}

struct AwaitAck {
    client: Client,
    timestamp: u64,
    started: Instant,
}

#[async_trait]
impl Session for AwaitAck {
    fn name(&self) -> &'static str {
        "await_ack"
    }

    async fn run(mut self: Box<Self>) -> Result<Step, SessionError> {
        let frame = self.client.recv().await?;
        match frame.message {
            Message::HeartbeatAck { timestamp } if timestamp == self.timestamp => {
                let rtt = self.started.elapsed();
                tracing::debug!("Heartbeat round trip {:?}", rtt);
                self.client.record(|r| r.round_trip = Some(rtt));
                Ok(Step::next(SayGoodbye {
                    client: self.client,
                    outcome: Outcome::finished(),
                }))
            }
            // Stale ack
            Message::HeartbeatAck { .. } => Ok(Step::Next(self)),
            other => Err(unexpected("await_ack", &other)),
        }
    }
}

struct SayGoodbye {
    client: Client,
    outcome: Outcome,
}

#[async_trait]
impl Session for SayGoodbye {
    fn name(&self) -> &'static str {
        "say_goodbye"
    }

    async fn run(mut self: Box<Self>) -> Result<Step, SessionError> {
        // The request already completed; a peer that left first is fine
        if let Err(e) = self.client.framed.send_control(Message::Goodbye).await {
            tracing::debug!("Goodbye not delivered: {}", e);
        }
        self.client.framed.close().await;
        Ok(Step::Done(self.outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_request_builder() {
        let request = ExecRequest::new(["make", "-j4"]).env("CC", "clang").cwd("/src");
        assert_eq!(request.argv, vec!["make", "-j4"]);
        assert_eq!(request.env, vec![("CC".to_string(), "clang".to_string())]);
        assert_eq!(request.cwd.as_deref(), Some("/src"));
    }

    #[test]
    fn test_unexpected_names_message_type() {
        let err = unexpected("await_ack", &Message::Goodbye);
        assert_eq!(err.to_string(), "Unexpected Goodbye in state await_ack");
    }
}
