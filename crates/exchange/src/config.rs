use std::time::Duration;

/// Handshake timing and replay-window knobs, grouped so a caller can
/// override them in one place (tests shrink `nonce_max_age`/
/// `nonce_cleanup_interval` to exercise replay rejection without waiting
/// five real minutes).
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub key_exchange_timeout: Duration,
    pub nonce_max_age: Duration,
    pub nonce_cleanup_interval: Duration,
    pub max_retry_attempts: u32,
    pub backoff_multiplier: f64,
    pub backoff_cap: Duration,
    pub retry_jitter_max: Duration,
    pub rotation_period: Duration,
    pub rotation_response_timeout: Duration,
    pub stabilization_delay: Duration,
    pub late_join_delay: Duration,
    pub processed_generations_capacity: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            key_exchange_timeout: Duration::from_secs(15),
            nonce_max_age: Duration::from_secs(5 * 60),
            nonce_cleanup_interval: Duration::from_secs(60),
            max_retry_attempts: 5,
            backoff_multiplier: 1.5,
            backoff_cap: Duration::from_secs(180),
            retry_jitter_max: Duration::from_secs(2),
            rotation_period: Duration::from_secs(60),
            rotation_response_timeout: Duration::from_secs(10),
            stabilization_delay: Duration::from_millis(500),
            late_join_delay: Duration::from_secs(1),
            processed_generations_capacity: 10,
        }
    }
}

impl ExchangeConfig {
    /// The timeout window for retry attempt `attempt` (0 = initial send),
    /// exponential backoff capped at `backoff_cap`, jitter applied by the
    /// caller.
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        let scaled = self.key_exchange_timeout.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.backoff_cap.as_secs_f64()))
    }
}
