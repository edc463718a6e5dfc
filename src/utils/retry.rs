use std::thread::sleep;
use std::time::Duration;

// ============================================================================
// Exponential Backoff Retry Strategy
// ============================================================================
//
// Retries store operations that failed for transient reasons (connection
// dropped, lock timeout). Runs on the caller's thread: the whole request is
// synchronous, so the backoff blocks it.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let next = Duration::from_millis(((delay.as_millis() as f64) * self.multiplier) as u64);
        next.min(self.max_delay)
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success(T),
    /// Operation failed after all retries
    Failed(E),
    /// Operation permanently failed (should not retry)
    PermanentFailure(E),
}

impl<T, E> RetryResult<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(value) => Ok(value),
            RetryResult::Failed(error) | RetryResult::PermanentFailure(error) => Err(error),
        }
    }
}

/// Check if an error is transient (should retry) or permanent (should not retry)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Run `operation`, retrying with backoff while it fails transiently.
///
/// `operation` receives the 1-based attempt number.
pub fn retry_on_transient<F, T, E>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    E: std::fmt::Display + IsTransient,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt) {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt = attempt, "Operation succeeded after retry");
                }
                return RetryResult::Success(result);
            }
            Err(error) => {
                if !error.is_transient() {
                    tracing::debug!(error = %error, "Permanent failure, not retrying");
                    return RetryResult::PermanentFailure(error);
                }

                if attempt >= config.max_attempts {
                    tracing::error!(
                        attempt = attempt,
                        error = %error,
                        "Operation failed after all retries"
                    );
                    return RetryResult::Failed(error);
                }

                tracing::warn!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis(),
                    "Transient failure, retrying after delay"
                );

                sleep(delay);
                delay = config.next_delay(delay);
            }
        }
    }
}
