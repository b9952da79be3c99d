use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff
// ============================================================================
//
// Shared backoff arithmetic for readiness polling and for retrying transient
// cluster API failures.
//
//   delay(n) = min(initial_delay * multiplier^n, max_delay)
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Base delay, scaled by `multiplier^n`
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl RetryConfig {
    /// Backoff used while polling infrastructure readiness
    pub fn readiness(poll_interval: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay: poll_interval,
            max_delay: cap,
            multiplier: 1.5,
        }
    }

    /// A single immediate retry, for optimistic-concurrency races
    pub fn once() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay to apply after `attempt` attempts have been made.
    ///
    /// Derived from the attempt number alone, so the sequence is
    /// non-decreasing (for `multiplier >= 1.0`) and never exceeds `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Still transient when attempts ran out
    Failed(E),
    /// Not worth retrying
    PermanentFailure(E),
}

impl<T, E> RetryResult<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(value) => Ok(value),
            RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => Err(e),
        }
    }
}

/// Errors that may succeed on a second try (e.g. a stale version token)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Runs `operation` until it succeeds, fails permanently, or
/// `config.max_attempts` is reached. The attempt number (1-based) is passed in.
pub async fn retry_on_transient<F, Fut, T, E>(
    config: RetryConfig,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(attempt = attempt, "Succeeded on retry");
                }
                return RetryResult::Success(result);
            }
            Err(error) => {
                if !error.is_transient() {
                    return RetryResult::PermanentFailure(error);
                }
                if attempt >= config.max_attempts {
                    tracing::warn!(attempts = attempt, error = %error, "Still failing, giving up");
                    return RetryResult::Failed(error);
                }

                let delay = config.delay_for(attempt - 1);
                tracing::debug!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying"
                );

                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
        }
    }
}
