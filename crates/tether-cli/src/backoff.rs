//! Exponential backoff for bootstrap retries

use std::time::Duration;

use tether_core::config::BackoffConfig;
use tether_core::{BootstrapError, ConnectionError};

/// Exponential backoff with jitter between bootstrap attempts
pub struct ExponentialBackoff {
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a new backoff with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay + Duration::from_secs_f64(jitter_amount)
    }
}

/// Whether another bootstrap attempt could succeed
///
/// A transport program that cannot be spawned, or a package that cannot
/// be built, fails the same way every time.
pub fn is_retryable(err: &BootstrapError) -> bool {
    match err {
        BootstrapError::Connection(ConnectionError::Spawn { .. }) => false,
        BootstrapError::Connection(_) => true,
        BootstrapError::Package(_) => false,
        BootstrapError::Timeout { .. }
        | BootstrapError::TransportExited { .. }
        | BootstrapError::Handshake(_)
        | BootstrapError::Transfer { .. } => true,
    }
}
