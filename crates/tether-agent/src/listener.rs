//! TCP listen mode
//!
//! Accepts clients on a socket and runs a server session for each, all
//! sharing one session key. Runs until its cancellation token fires.

use std::net::SocketAddr;

use tether_core::TcpChannel;
use tether_protocol::SessionKey;
use tether_session::{Server, ServerInfo};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::AgentError;

/// Key-authenticated session server on a TCP socket
pub struct Listener {
    listener: TcpListener,
    key: SessionKey,
    info: ServerInfo,
    cancel: CancellationToken,
}

impl Listener {
    /// Bind `address` (host:port, port 0 for any)
    pub async fn bind(address: &str, key: SessionKey, info: ServerInfo) -> Result<Self, AgentError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| AgentError::Bind {
                address: address.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            key,
            info,
            cancel: CancellationToken::new(),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Token that stops the accept loop and open sessions
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept clients until cancelled
    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            tracing::info!("Listening on {}", addr);
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Listener shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => tracing::error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }
    }

    fn handle_connection(&self, socket: tokio::net::TcpStream, peer_addr: SocketAddr) {
        tracing::info!("New connection from {}", peer_addr);

        let channel = TcpChannel::from_stream(socket, peer_addr.to_string());
        let server = Server::new(Box::new(channel), self.key.clone(), self.info.clone());
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Session with {} cancelled", peer_addr);
                    return;
                }
                result = server.run() => result
            };

            match result {
                Ok(_) => tracing::info!("Session with {} ended", peer_addr),
                Err(e) => tracing::warn!("Session with {} failed: {}", peer_addr, e),
            }
        });
    }
}
