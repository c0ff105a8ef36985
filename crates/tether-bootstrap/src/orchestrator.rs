//! Bootstrap orchestrator

use std::time::Duration;

use tether_core::config::{BootstrapConfig, HostProfile, TetherConfig};
use tether_core::{BootstrapError, Channel};
use tether_protocol::{BootstrapPackage, HandshakeSignature, LoaderScript, LoaderSpec, SessionKey};

use crate::handshake::{synchronize, HandshakeLimits, HandshakeReport};
use crate::stderr::StderrTail;
use crate::transport::{transport_from_config, Spawned, Transport};

/// How long to wait for a dead transport's last stderr lines
const STDERR_SETTLE: Duration = Duration::from_millis(500);

/// A host with the runtime running on the other end of `channel`
pub struct Bootstrapped {
    /// Channel attached to the remote entry point's stdin/stdout
    pub channel: Box<dyn Channel>,
    /// Key the entry point was started with
    pub key: SessionKey,
    /// Label of the remote end
    pub peer: String,
    /// Transport stderr, still draining
    pub stderr: StderrTail,
    /// What the handshake saw
    pub report: HandshakeReport,
}

impl std::fmt::Debug for Bootstrapped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapped")
            .field("peer", &self.peer)
            .field("key", &self.key)
            .field("report", &self.report)
            .finish()
    }
}

/// Pushes one package to hosts through one transport
pub struct Bootstrapper {
    transport: Box<dyn Transport>,
    package: BootstrapPackage,
    config: BootstrapConfig,
}

impl Bootstrapper {
    /// Create a bootstrapper
    pub fn new(transport: Box<dyn Transport>, package: BootstrapPackage, config: BootstrapConfig) -> Self {
        Self {
            transport,
            package,
            config,
        }
    }

    /// Load the configured modules and transport
    pub fn from_config(config: &TetherConfig) -> Result<Self, BootstrapError> {
        let package = BootstrapPackage::from_paths(
            config
                .modules
                .iter()
                .map(|m| (m.name.as_str(), m.path.as_path())),
        )?;
        Ok(Self::new(
            transport_from_config(config),
            package,
            config.bootstrap.clone(),
        ))
    }

    /// The package this bootstrapper sends
    pub fn package(&self) -> &BootstrapPackage {
        &self.package
    }

    /// Start the runtime on `target`
    ///
    /// Every failure after the transport started closes the channel,
    /// which terminates and reaps the transport process.
    pub async fn bootstrap(&self, target: &HostProfile) -> Result<Bootstrapped, BootstrapError> {
        let key = SessionKey::generate();
        let signature = HandshakeSignature::generate();
        let manifest = self.package.manifest();
        let script = LoaderScript::generate(LoaderSpec {
            signature: &signature,
            key: &key,
            manifest: &manifest,
            entry_args: &self.config.entry_args,
        });

        tracing::info!(
            "Bootstrapping {} via {} ({} modules, {} bytes)",
            target.host,
            self.transport.kind(),
            manifest.entries().len(),
            manifest.total_len()
        );

        let Spawned {
            mut channel,
            mut stderr,
        } = self.transport.spawn(target, &script).await?;
        channel.set_blocking(true);

        let limits = HandshakeLimits::from(&self.config);
        let report = match synchronize(channel.as_mut(), &signature, &limits).await {
            Ok(report) => report,
            Err(err) => {
                channel.close().await;
                let lines = stderr.finish(STDERR_SETTLE).await;
                return Err(match err {
                    BootstrapError::TransportExited { .. } => BootstrapError::TransportExited { stderr: lines },
                    other => {
                        for line in &lines {
                            tracing::warn!("[{} stderr] {}", target.host, line);
                        }
                        other
                    }
                });
            }
        };
        tracing::debug!(
            "Handshake with {} after {:?} ({} bytes of noise)",
            target.host,
            report.elapsed,
            report.noise_bytes
        );

        for module in self.package.modules() {
            if let Err(source) = channel.write_all(module.payload()).await {
                channel.close().await;
                return Err(BootstrapError::Transfer {
                    module: module.name().to_string(),
                    source,
                });
            }
            tracing::debug!("Sent module {} ({} bytes)", module.name(), module.len());
        }

        let peer = channel.peer_name().to_string();
        tracing::info!("Runtime started on {}", peer);

        Ok(Bootstrapped {
            channel,
            key,
            peer,
            stderr,
            report,
        })
    }
}
