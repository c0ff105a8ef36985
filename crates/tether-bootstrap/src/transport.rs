//! Transport processes
//!
//! A transport is whatever process connects us to the remote shell. Its
//! stdin/stdout become the channel; the loader script rides in its command
//! arguments.

use std::process::Stdio;

use async_trait::async_trait;
use tether_core::config::{HostProfile, TetherConfig, TransportKind};
use tether_core::{Channel, ConnectionError, ProcessChannel};
use tether_protocol::LoaderScript;
use tokio::process::Command;

use crate::stderr::StderrTail;

/// Replaced by the script text in a command transport argv
pub const SCRIPT_PLACEHOLDER: &str = "{script}";

/// Replaced by `sh -c '<script>'` in a command transport argv
pub const REMOTE_COMMAND_PLACEHOLDER: &str = "{remote_command}";

const DEFAULT_STDERR_LINES: usize = 20;

/// A started transport
pub struct Spawned {
    /// Channel over the process's stdout (read) and stdin (write)
    pub channel: Box<dyn Channel>,
    /// The process's stderr, drained in the background
    pub stderr: StderrTail,
}

impl std::fmt::Debug for Spawned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawned")
            .field("peer", &self.channel.peer_name())
            .finish()
    }
}

/// Starts the process that carries a loader script to a host
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short transport name for logs
    fn kind(&self) -> &'static str;

    /// Start the transport for `target` with `script` as its command
    async fn spawn(&self, target: &HostProfile, script: &LoaderScript) -> Result<Spawned, ConnectionError>;
}

/// Spawn `argv` with piped stdio and wrap it
///
/// The argv carries the session key, so only the program name is logged.
pub async fn spawn_process(
    argv: Vec<String>,
    peer: String,
    stderr_lines: usize,
    configure: impl FnOnce(&mut Command),
) -> Result<Spawned, ConnectionError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(ConnectionError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty transport command"),
        });
    };

    tracing::debug!("Spawning {} for {} ({} args)", program, peer, args.len());

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    configure(&mut command);

    let mut child = command.spawn().map_err(|source| ConnectionError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stderr = match child.stderr.take() {
        Some(stream) => StderrTail::capture(stream, peer.clone(), stderr_lines),
        None => StderrTail::empty(),
    };
    let channel = ProcessChannel::from_child(child, peer)?;

    Ok(Spawned {
        channel: Box::new(channel),
        stderr,
    })
}

/// `ssh [-p port] [options] [user@]host 'sh -c ...'`
#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
    extra_args: Vec<String>,
    stderr_lines: usize,
}

impl SshTransport {
    /// Use `program` (normally `ssh`) with options before the destination
    pub fn new(program: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
            stderr_lines: DEFAULT_STDERR_LINES,
        }
    }

    /// Keep this many stderr lines for error reports
    pub fn with_stderr_lines(mut self, lines: usize) -> Self {
        self.stderr_lines = lines;
        self
    }

    /// Full argv for `target`
    pub fn argv(&self, target: &HostProfile, script: &LoaderScript) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        if let Some(port) = target.port {
            argv.push("-p".to_string());
            argv.push(port.to_string());
        }
        argv.extend(self.extra_args.iter().cloned());
        argv.extend(target.extra_args.iter().cloned());
        argv.push(target.destination());
        // ssh hands this string to the remote login shell as one command
        argv.push(script.remote_command());
        argv
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn kind(&self) -> &'static str {
        "ssh"
    }

    async fn spawn(&self, target: &HostProfile, script: &LoaderScript) -> Result<Spawned, ConnectionError> {
        let peer = format!("ssh:{}", target.destination());
        spawn_process(self.argv(target, script), peer, self.stderr_lines, |_| {}).await
    }
}

/// `sh -c <script>` on this machine
#[derive(Debug, Clone)]
pub struct LocalTransport {
    stderr_lines: usize,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTransport {
    /// Create a local transport
    pub fn new() -> Self {
        Self {
            stderr_lines: DEFAULT_STDERR_LINES,
        }
    }

    /// Keep this many stderr lines for error reports
    pub fn with_stderr_lines(mut self, lines: usize) -> Self {
        self.stderr_lines = lines;
        self
    }

    /// Full argv; the target is ignored
    pub fn argv(&self, script: &LoaderScript) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.text().to_string()]
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn spawn(&self, _target: &HostProfile, script: &LoaderScript) -> Result<Spawned, ConnectionError> {
        spawn_process(self.argv(script), "local".to_string(), self.stderr_lines, |command| {
            // The peer label comes from SSH_CONNECTION when present
            command.env_remove("SSH_CONNECTION");
        })
        .await
    }
}

/// Any configured argv, e.g. `docker exec -i box` or `kubectl exec -i pod --`
///
/// `{script}` and `{remote_command}` arguments are substituted. Without
/// either, `sh -c <script>` is appended as three arguments.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    command: Vec<String>,
    stderr_lines: usize,
}

impl CommandTransport {
    /// Create a command transport
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            stderr_lines: DEFAULT_STDERR_LINES,
        }
    }

    /// Keep this many stderr lines for error reports
    pub fn with_stderr_lines(mut self, lines: usize) -> Self {
        self.stderr_lines = lines;
        self
    }

    /// Full argv with placeholders substituted
    pub fn argv(&self, script: &LoaderScript) -> Vec<String> {
        let mut substituted = false;
        let mut argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| match arg.as_str() {
                SCRIPT_PLACEHOLDER => {
                    substituted = true;
                    script.text().to_string()
                }
                REMOTE_COMMAND_PLACEHOLDER => {
                    substituted = true;
                    script.remote_command()
                }
                _ => arg.clone(),
            })
            .collect();
        if !substituted {
            argv.push("sh".to_string());
            argv.push("-c".to_string());
            argv.push(script.text().to_string());
        }
        argv
    }
}

#[async_trait]
impl Transport for CommandTransport {
    fn kind(&self) -> &'static str {
        "command"
    }

    async fn spawn(&self, target: &HostProfile, script: &LoaderScript) -> Result<Spawned, ConnectionError> {
        let program = self.command.first().map(String::as_str).unwrap_or("command");
        let peer = format!("{}:{}", program, target.host);
        spawn_process(self.argv(script), peer, self.stderr_lines, |_| {}).await
    }
}

/// Build the configured transport
pub fn transport_from_config(config: &TetherConfig) -> Box<dyn Transport> {
    let lines = config.bootstrap.stderr_tail_lines;
    match config.transport.kind {
        TransportKind::Ssh => Box::new(
            SshTransport::new(config.transport.program.clone(), config.transport.extra_args.clone())
                .with_stderr_lines(lines),
        ),
        TransportKind::Local => Box::new(LocalTransport::new().with_stderr_lines(lines)),
        TransportKind::Command => {
            Box::new(CommandTransport::new(config.transport.command.clone()).with_stderr_lines(lines))
        }
    }
}
