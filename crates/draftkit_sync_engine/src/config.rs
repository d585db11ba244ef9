//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifier of the authenticated user this session syncs for.
    pub user_id: String,
    /// Opaque auth token presented to the server on every request.
    pub auth_token: String,
    /// Server URL.
    pub server_url: String,
    /// Maximum number of queued changes sent per push request.
    pub push_batch_size: usize,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(
        user_id: impl Into<String>,
        auth_token: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: auth_token.into(),
            server_url: server_url.into(),
            push_batch_size: 100,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Backoff schedule for retryable cycle failures.
///
/// Attempt 0 runs immediately. Attempt `n` waits
/// `initial_delay * backoff_multiplier^(n-1)`, capped at `max_delay`,
/// with up to 25% jitter stacked on top unless disabled.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before the cycle error is reported as final.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Ceiling the schedule never exceeds (before jitter).
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub backoff_multiplier: f64,
    /// Whether to spread the waits with jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables or re-enables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// The wait before the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(retries_before) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let grown = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(retries_before as i32);
        let spread = match self.add_jitter {
            true => 1.0 + 0.25 * subsecond_fraction(),
            false => 1.0,
        };
        Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()) * spread)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Clock-derived jitter factor in `[0, 1)`.
fn subsecond_fraction() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    f64::from(since_epoch.subsec_nanos() % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("user-7", "token", "https://sync.example.com")
            .with_push_batch_size(25)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.user_id, "user-7");
        assert_eq!(config.server_url, "https://sync.example.com");
        assert_eq!(config.push_batch_size, 25);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn backoff_grows_until_capped() {
        let config = RetryConfig::new(8)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(400))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        // The cap holds however far the attempts go.
        assert_eq!(config.delay_for_attempt(7), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_base() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));

        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }
}
