use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::PipelineSettings;
use crate::error::ServiceError;

/// Exponential backoff with jitter for retryable service failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            settings.max_retries,
            Duration::from_millis(settings.backoff_base_ms),
            Duration::from_millis(settings.backoff_max_ms),
        )
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based), capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        if delay.is_zero() {
            return delay;
        }
        let jitter_ms = (delay.as_millis() as u64 / 4).max(1);
        delay + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Runs `op` until it succeeds, fails permanently, or retries run out.
    /// Returns the final result and the number of attempts made.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> (Result<T, ServiceError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return (Ok(v), attempt),
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    let delay = self.backoff(attempt);
                    tracing::debug!("Retrying after {:?} (attempt {}): {}", delay, attempt, e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}
