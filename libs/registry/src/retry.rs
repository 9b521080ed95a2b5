//! Bounded retry with exponential backoff for transient transport failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::RegistryError;

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter = delay * self.jitter * (rand::random::<f64>() * 2.0 - 1.0);
        Duration::from_millis((delay + jitter).max(0.0) as u64)
    }
}

/// How many times, and how patiently, to retry a transient failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Run `op`, retrying transient errors.
    ///
    /// Non-transient errors are returned as-is on first occurrence. Running
    /// out of attempts wraps the last error in `RetriesExhausted`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RegistryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(RegistryError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }

                    let delay = self.backoff.delay(attempt - 1);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
