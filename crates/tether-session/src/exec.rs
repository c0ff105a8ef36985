//! Remote command runner
//!
//! Runs one `Exec` request on the serving host and streams its output back
//! as `Stdout`/`Stderr` frames tagged with the request id, then `Exited`.
//! A command that cannot be started is answered with an `Error` frame; the
//! session itself carries on.

use std::process::Stdio;

use bytes::Bytes;
use tether_core::{FramedChannel, SessionError};
use tether_protocol::loader::KEY_ENV;
use tether_protocol::{ErrorCode, Frame, Message, RequestId};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Output bytes per frame
const CHUNK_SIZE: usize = 32 * 1024;

/// Run `argv` and relay its output over `framed`
///
/// The session key is not passed on to the command.
pub async fn run_command(
    framed: &mut FramedChannel,
    id: RequestId,
    argv: &[String],
    env: &[(String, String)],
    cwd: Option<&str>,
) -> Result<(), SessionError> {
    let Some((program, args)) = argv.split_first() else {
        return send_failure(framed, id, "empty command".to_string()).await;
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .env_remove(KEY_ENV)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return send_failure(framed, id, format!("{}: {}", program, e)).await,
    };
    tracing::info!("{}: started {} (pid {:?})", id, program, child.id());

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = vec![0u8; CHUNK_SIZE];
    let mut err_buf = vec![0u8; CHUNK_SIZE];

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_some(&mut stdout, &mut out_buf), if stdout.is_some() => match read {
                Ok(0) => stdout = None,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&out_buf[..n]);
                    framed.send(Frame::new(id, Message::Stdout(chunk))).await?;
                }
                Err(e) => {
                    tracing::debug!("{}: stdout read failed: {}", id, e);
                    stdout = None;
                }
            },
            read = read_some(&mut stderr, &mut err_buf), if stderr.is_some() => match read {
                Ok(0) => stderr = None,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&err_buf[..n]);
                    framed.send(Frame::new(id, Message::Stderr(chunk))).await?;
                }
                Err(e) => {
                    tracing::debug!("{}: stderr read failed: {}", id, e);
                    stderr = None;
                }
            },
        }
    }

    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!("{}: failed to wait for {}: {}", id, program, e);
            None
        }
    };
    tracing::info!("{}: {} exited with {:?}", id, program, code);

    framed.send(Frame::new(id, Message::Exited { code })).await
}

async fn read_some<R: AsyncRead + Unpin>(stream: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn send_failure(framed: &mut FramedChannel, id: RequestId, message: String) -> Result<(), SessionError> {
    tracing::warn!("{}: exec failed: {}", id, message);
    framed
        .send(Frame::new(
            id,
            Message::Error {
                code: ErrorCode::ExecFailed,
                message,
            },
        ))
        .await
}
