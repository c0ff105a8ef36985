//! Wall-clock helpers for heartbeat timestamps

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds
///
/// A clock set before 1970 reads as 0.
///
/// # Examples
/// ```
/// use tether_core::time::current_time_millis;
///
/// assert!(current_time_millis() > 0);
/// ```
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Milliseconds elapsed since a timestamp from [`current_time_millis`]
///
/// Returns 0 if the timestamp is in the future.
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

/// [`elapsed_millis`] as a `Duration`
pub fn elapsed_duration(since_millis: u64) -> Duration {
    Duration::from_millis(elapsed_millis(since_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_millis() {
        let now = current_time_millis();
        std::thread::sleep(Duration::from_millis(10));
        assert!(elapsed_millis(now) >= 10);
        assert!(elapsed_duration(now) >= Duration::from_millis(10));
    }

    #[test]
    fn test_elapsed_millis_future_time() {
        let future = current_time_millis() + 1_000_000;
        assert_eq!(elapsed_millis(future), 0);
    }
}
