//! Retry utilities with exponential backoff for the outbound adapters.
//!
//! The pipeline itself never retries a stage. Adapters for idempotent
//! calls (embedding, vector search) may wrap their request in
//! [`with_retry`]; a cancelled token stops both the pending attempt and
//! the backoff sleep.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Backoff multiplier (delay *= multiplier after each retry).
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// One attempt plus up to `retries` more, as configured by `max_retries`.
    #[must_use]
    pub fn with_retries(retries: u32) -> Self {
        Self::new(retries.saturating_add(1))
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1)
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(current.as_secs_f64() * self.multiplier).min(self.max_delay)
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    Failed { last_error: E, attempts: u32 },
    /// The token fired before an attempt could finish.
    Cancelled { attempts: u32 },
}

/// Determines if an error is worth another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Execute an async operation with exponential backoff, honouring `cancel`.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut delay = config.initial_delay;

    loop {
        attempts += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RetryOutcome::Cancelled { attempts },
            result = operation() => result,
        };

        match result {
            Ok(value) => return RetryOutcome::Success(value),
            Err(error) => {
                if attempts >= config.max_attempts || !error.is_retryable() {
                    return RetryOutcome::Failed {
                        last_error: error,
                        attempts,
                    };
                }

                let pause = delay + jitter(delay);
                tracing::debug!(attempt = attempts, delay_ms = pause.as_millis() as u64, error = %error, "retrying");

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return RetryOutcome::Cancelled { attempts },
                    _ = tokio::time::sleep(pause) => {}
                }

                delay = config.next_delay(delay);
            }
        }
    }
}

/// Up to a quarter of `delay`, derived from the clock's sub-second noise.
fn jitter(delay: Duration) -> Duration {
    let max = delay.as_millis() as u64 / 4;
    if max == 0 {
        return Duration::ZERO;
    }
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    Duration::from_millis(seed % max)
}
