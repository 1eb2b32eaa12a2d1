//! Bounded exponential backoff with jitter.
//!
//! Storage commits race under optimistic concurrency, so every merge
//! passes through a [`RetryHarness`]. The harness retries only errors
//! the caller marks as retryable (the distinguished
//! concurrent-modification error); anything else propagates on the
//! first occurrence. Exhaustion is reported as a distinct error that
//! carries the last underlying cause.

use std::time::{Duration, Instant};

/// Default minimum wait between attempts.
pub const DEFAULT_MIN_WAIT: Duration = Duration::from_millis(100);

/// Default maximum wait between attempts.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Default jitter factor.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.25;

/// Default maximum number of attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Errors raised when constructing a [`RetryPolicy`].
#[derive(Debug, thiserror::Error)]
#[error("invalid retry policy: {message}")]
pub struct InvalidRetryPolicy {
    /// Description of the invalid setting.
    message: String,
}

/// Retry policy settings.
///
/// Constructed once per job from configuration and shared read-only
/// across supervisors. `max_attempts = 1` disables retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    min_wait: Duration,
    max_wait: Duration,
    jitter_factor: f64,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_wait: DEFAULT_MIN_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRetryPolicy`] when `max_attempts` is zero,
    /// `jitter_factor` is outside `[0, 1]`, or `min_wait > max_wait`.
    pub fn new(
        min_wait: Duration,
        max_wait: Duration,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Result<Self, InvalidRetryPolicy> {
        if max_attempts == 0 {
            return Err(InvalidRetryPolicy {
                message: "max attempts must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&jitter_factor) {
            return Err(InvalidRetryPolicy {
                message: format!("jitter factor {jitter_factor} must be within [0, 1]"),
            });
        }
        if min_wait > max_wait {
            return Err(InvalidRetryPolicy {
                message: format!("min wait {min_wait:?} exceeds max wait {max_wait:?}"),
            });
        }
        Ok(Self {
            min_wait,
            max_wait,
            jitter_factor,
            max_attempts,
        })
    }

    /// Maximum number of attempts including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff delay before the attempt following `attempt` (1-based),
    /// jitter included.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let backoff = self
            .min_wait
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_wait);
        backoff + self.jitter(backoff)
    }

    /// Jitter proportional to the backoff, scaled by the jitter factor.
    fn jitter(&self, backoff: Duration) -> Duration {
        backoff.mul_f64(self.jitter_factor * jitter_fraction())
    }
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Every attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempts ({elapsed:?})")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Total elapsed time across attempts.
        elapsed: Duration,
        /// The last underlying cause.
        #[source]
        source: E,
    },

    /// A non-retryable error occurred; propagated on first occurrence.
    #[error(transparent)]
    Failed(E),
}

/// Wraps fallible actions in bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryHarness {
    policy: RetryPolicy,
}

impl RetryHarness {
    /// Creates a harness around the given policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Runs `op`, retrying while `is_retryable` accepts the error and
    /// attempts remain.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Failed`] for the first non-retryable error
    /// and [`RetryError::Exhausted`] with the last cause once
    /// `max_attempts` retryable failures have occurred.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        is_retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    tracing::trace!(
                        operation,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "operation succeeded"
                    );
                    return Ok(value);
                }
                Err(e) if !is_retryable(&e) => return Err(RetryError::Failed(e)),
                Err(e) => {
                    tracing::debug!(operation, attempt, error = %e, "failed attempt");
                    if attempt >= self.policy.max_attempts() {
                        let elapsed = started.elapsed();
                        tracing::error!(
                            operation,
                            attempts = attempt,
                            elapsed_ms = elapsed.as_millis() as u64,
                            error = %e,
                            "retries exceeded"
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            elapsed,
                            source: e,
                        });
                    }

                    let delay = self.policy.delay_after(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "retrying after attempt"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Random fraction in `[0, 1)` seeded from the clock.
///
/// A linear take on the subsecond nanos avoids a full `rand` dependency
/// for this simple case.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1_000_000) / 1_000_000.0
}
