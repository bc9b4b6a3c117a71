//! Retry policy, attempt classification and retry predicates.
//!
//! A [`RetryPolicy`] decides *how long* to wait before each attempt, a
//! [`RetryPredicate`] decides *whether* a failure may be retried at all, and
//! [`AttemptOutcome`] is the result of putting one attempt through both.

use crate::{Error, ErrorKind, Result};
use async_trait::async_trait;
use http::StatusCode;
use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff.
///
/// The delay before attempt `n` (1-indexed, `n > 1`) is
/// `initial_delay * backoff_multiplier^(n - 2)`. No delay precedes the first
/// attempt.
///
/// # Examples
///
/// ```
/// use chatguard::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(4, Duration::from_millis(1000), 2.0).unwrap();
///
/// assert_eq!(policy.delay_before_attempt(1), None);
/// assert_eq!(policy.delay_before_attempt(2), Some(Duration::from_millis(1000)));
/// assert_eq!(policy.delay_before_attempt(3), Some(Duration::from_millis(2000)));
/// assert_eq!(policy.delay_before_attempt(4), Some(Duration::from_millis(4000)));
/// assert_eq!(policy.delay_before_attempt(5), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of HTTP attempts, including the first one. At least 1.
    pub max_attempts: usize,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays. At least 1.0.
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay. `None` leaves delays uncapped.
    pub max_delay: Option<Duration>,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Creates a validated policy without a delay cap or jitter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `max_attempts` is zero or
    /// `backoff_multiplier` is below 1.0 or not finite.
    pub fn new(
        max_attempts: usize,
        initial_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self> {
        let policy = Self {
            max_attempts,
            initial_delay,
            backoff_multiplier,
            max_delay: None,
            jitter: false,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// A policy that makes exactly one attempt.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Caps every delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Enables or disables random jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Checks the policy invariants.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::Configuration(format!(
                "backoff_multiplier must be a finite number >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    /// Returns the delay to wait before the given attempt, or `None` when no
    /// wait applies (the first attempt, or an attempt past `max_attempts`).
    ///
    /// # Arguments
    ///
    /// * `attempt` - The attempt number (1-indexed)
    pub fn delay_before_attempt(&self, attempt: usize) -> Option<Duration> {
        if attempt <= 1 || attempt > self.max_attempts {
            return None;
        }

        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        let mut delay = if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos.round() as u64)
        } else {
            Duration::from_nanos(u64::MAX)
        };

        if let Some(max_delay) = self.max_delay {
            delay = delay.min(max_delay);
        }

        if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
            delay = delay.mul_f64(jitter_factor);
        }

        Some(delay)
    }
}

impl Default for RetryPolicy {
    /// Three attempts, 1s initial delay, doubling.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: None,
            jitter: false,
        }
    }
}

/// The classified result of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    /// The attempt produced usable content.
    Success(T),
    /// The attempt failed but another attempt may succeed.
    Retryable(Error),
    /// The attempt failed in a way retrying cannot fix.
    Fatal(Error),
}

impl<T> AttemptOutcome<T> {
    /// Classifies an attempt result using `predicate`.
    ///
    /// 4xx responses and local errors are always fatal; the predicate can
    /// only narrow the set of retried failures.
    pub fn classify(result: Result<T>, predicate: &dyn RetryPredicate, attempt: usize) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(e) if matches!(e.kind(), ErrorKind::Client | ErrorKind::Local) => {
                AttemptOutcome::Fatal(e)
            }
            Err(e) if predicate.should_retry(&e, attempt) => AttemptOutcome::Retryable(e),
            Err(e) => AttemptOutcome::Fatal(e),
        }
    }
}

/// Trait for determining whether a failed attempt should be retried.
///
/// # Examples
///
/// ```
/// use chatguard::{Error, RetryPredicate};
///
/// struct RetryOnGatewayErrors;
///
/// impl RetryPredicate for RetryOnGatewayErrors {
///     fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
///         matches!(error.status().map(|s| s.as_u16()), Some(502) | Some(504))
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Determines whether the attempt should be retried based on the error.
    ///
    /// # Arguments
    ///
    /// * `error` - The error that occurred
    /// * `attempt` - The attempt number (1-indexed)
    fn should_retry(&self, error: &Error, attempt: usize) -> bool;
}

/// Retry all errors that are marked as retryable.
///
/// This uses [`Error::is_retryable`]: timeouts, network errors, malformed
/// bodies and every 5xx status.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnRetryable;

impl RetryPredicate for RetryOnRetryable {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.is_retryable()
    }
}

/// Like [`RetryOnRetryable`], but only 500, 502, 503 and 504 count as
/// retryable server errors. Statuses such as 501 or 505 are permanent.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTransientServerError;

impl RetryPredicate for RetryOnTransientServerError {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        match error {
            Error::HttpError { status, .. } => matches!(
                *status,
                StatusCode::INTERNAL_SERVER_ERROR
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            other => other.is_retryable(),
        }
    }
}

/// Suspends the current task between attempts.
///
/// The client routes every backoff wait and the fallback's simulated latency
/// through this trait, so tests can substitute a recording clock.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
