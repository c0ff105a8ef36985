//! Server role
//!
//! ```text
//! AwaitHello -> Serve <-> RunCommand
//! ```
//!
//! `Serve` handles one request per step and ends on `Goodbye` or when the
//! client goes away. Every frame after `Welcome` is authenticated.

use async_trait::async_trait;
use tether_core::{drive, Channel, FramedChannel, Outcome, Session, SessionError, Step};
use tether_protocol::secret::generate_nonce;
use tether_protocol::{ErrorCode, Frame, Message, RequestId, SessionKey, Side, PROTOCOL_VERSION};

use crate::exec::run_command;

/// What the server tells clients about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Name reported as the remote hostname
    pub hostname: String,
    /// Operating system, as in `std::env::consts::OS`
    pub os: String,
    /// CPU architecture, as in `std::env::consts::ARCH`
    pub arch: String,
}

impl ServerInfo {
    /// This machine, under `hostname`
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Server side of a session
pub struct Server {
    framed: FramedChannel,
    key: SessionKey,
    info: ServerInfo,
    requests: u32,
}

impl Server {
    /// Serve a client over `channel`, accepting only holders of `key`
    pub fn new(channel: Box<dyn Channel>, key: SessionKey, info: ServerInfo) -> Self {
        Self {
            framed: FramedChannel::new(channel),
            key,
            info,
            requests: 0,
        }
    }

    /// First state of the server session
    pub fn into_session(self) -> Box<dyn Session> {
        Box::new(AwaitHello { server: self })
    }

    /// Run until the client leaves
    pub async fn run(self) -> Result<Outcome, SessionError> {
        drive(self.into_session()).await
    }

    async fn reject(&mut self, reason: &str) {
        if let Err(e) = self
            .framed
            .send_control(Message::Rejected {
                reason: reason.to_string(),
            })
            .await
        {
            tracing::debug!("Could not deliver rejection: {}", e);
        }
        self.framed.close().await;
    }
}

/// Same major version
fn compatible(version: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_string);
    major(version) == major(PROTOCOL_VERSION)
}

struct AwaitHello {
    server: Server,
}

#[async_trait]
impl Session for AwaitHello {
    fn name(&self) -> &'static str {
        "await_hello"
    }

    async fn run(mut self: Box<Self>) -> Result<Step, SessionError> {
        let peer = self.server.framed.peer_name().to_string();
        let Some(frame) = self.server.framed.recv().await? else {
            return Err(SessionError::UnexpectedClose);
        };

        match frame.message {
            Message::Hello { version, nonce, proof } => {
                if !compatible(&version) {
                    let reason = format!("unsupported protocol version {}", version);
                    self.server.reject(&reason).await;
                    return Err(SessionError::Rejected(reason));
                }
                if !self.server.key.verify(&nonce, &proof) {
                    tracing::warn!("Rejecting {}: bad key proof", peer);
                    self.server.reject("authentication failed").await;
                    return Err(SessionError::AuthenticationFailed);
                }

                let info = self.server.info.clone();
                let server_nonce = generate_nonce();
                self.server
                    .framed
                    .send_control(Message::Welcome {
                        version: PROTOCOL_VERSION.to_string(),
                        nonce: server_nonce.clone(),
                        hostname: info.hostname,
                        os: info.os,
                        arch: info.arch,
                    })
                    .await?;
                self.server
                    .framed
                    .authenticate(&self.server.key, &nonce, &server_nonce, Side::Server)?;
                tracing::info!("Client {} authenticated", peer);
                Ok(Step::next(Serve { server: self.server }))
            }
            other => {
                let message = format!("{:?}", other.message_type());
                self.server.reject("expected Hello").await;
                Err(SessionError::UnexpectedMessage {
                    state: "await_hello",
                    message,
                })
            }
        }
    }
}

struct Serve {
    server: Server,
}

#[async_trait]
impl Session for Serve {
    fn name(&self) -> &'static str {
        "serve"
    }

    async fn run(mut self: Box<Self>) -> Result<Step, SessionError> {
        let Some(frame) = self.server.framed.recv().await? else {
            tracing::info!("Client left after {} requests", self.server.requests);
            return Ok(Step::Done(Outcome::finished()));
        };

        match frame.message {
            Message::Exec { argv, env, cwd } => {
                self.server.requests += 1;
                Ok(Step::next(RunCommand {
                    server: self.server,
                    id: frame.request_id,
                    argv,
                    env,
                    cwd,
                }))
            }
            Message::Heartbeat { timestamp } => {
                self.server
                    .framed
                    .send(Frame::new(frame.request_id, Message::HeartbeatAck { timestamp }))
                    .await?;
                Ok(Step::Next(self))
            }
            Message::Goodbye => {
                tracing::info!("Client said goodbye after {} requests", self.server.requests);
                self.server.framed.close().await;
                Ok(Step::Done(Outcome::finished()))
            }
            other => {
                tracing::debug!("Unexpected {:?} while serving", other.message_type());
                self.server
                    .framed
                    .send(Frame::new(
                        frame.request_id,
                        Message::Error {
                            code: ErrorCode::InvalidMessage,
                            message: format!("unexpected {:?}", other.message_type()),
                        },
                    ))
                    .await?;
                Ok(Step::Next(self))
            }
        }
    }
}

struct RunCommand {
    server: Server,
    id: RequestId,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<String>,
}

#[async_trait]
impl Session for RunCommand {
    fn name(&self) -> &'static str {
        "run_command"
    }

    async fn run(self: Box<Self>) -> Result<Step, SessionError> {
        let RunCommand {
            mut server,
            id,
            argv,
            env,
            cwd,
        } = *self;
        run_command(&mut server.framed, id, &argv, &env, cwd.as_deref()).await?;
        Ok(Step::next(Serve { server }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        assert!(compatible("1.0"));
        assert!(compatible("1.7"));
        assert!(!compatible("2.0"));
        assert!(!compatible(""));
    }

    #[test]
    fn test_server_info_describes_this_machine() {
        let info = ServerInfo::new("box");
        assert_eq!(info.hostname, "box");
        assert_eq!(info.os, std::env::consts::OS);
        assert!(!info.arch.is_empty());
    }
}
