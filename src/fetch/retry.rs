//! Retry logic with backoff for transient fetch failures.
//!
//! When a fetch attempt fails, the failure is classified into a
//! [`FailureType`]:
//! - [`FailureType::Transient`] - timeouts, 5xx responses, connection resets
//! - [`FailureType::Terminal`] - 4xx responses, malformed URIs/responses
//!
//! The [`RetryPolicy`] then decides whether to retry based on the failure
//! type and the attempt count, producing backoff delays with jitter. Retry
//! behavior is strictly local to the fetch stage: no other pipeline stage
//! re-triggers a fetch on its own failure.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::debug;

/// Default maximum fetch attempts, including the initial one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (500ms).
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default maximum delay cap (16 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(16);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Maximum jitter added to delays (250ms).
const MAX_JITTER: Duration = Duration::from_millis(250);

/// Classification of a failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection reset.
    Transient,

    /// Failure that will not succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 400 Bad Request, invalid URI.
    Terminal,
}

/// Decision on whether to retry a failed fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed,
    /// Delay grows by a multiplier each attempt, capped at a maximum.
    Exponential,
}

/// Configuration for fetch retry behavior.
///
/// # Delay Calculation
///
/// ```text
/// exponential: delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// fixed:       delay = base_delay + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap (exponential backoff only).
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f64,

    /// Backoff strategy.
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            backoff,
        }
    }

    /// Creates a policy with a custom attempt budget, defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry a failed fetch attempt.
    ///
    /// `attempt` is the attempt number that just failed (1-indexed).
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Terminal {
            return RetryDecision::DoNotRetry {
                reason: "terminal failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay before the next attempt.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;

        let delay_ms = match self.backoff {
            Backoff::Fixed => base_ms,
            Backoff::Exponential => {
                // attempt is 1-indexed; attempt 1 gets the base delay
                let exponent = f64::from(attempt - 1);
                let raw = base_ms * self.backoff_multiplier.powf(exponent);
                raw.min(self.max_delay.as_millis() as f64)
            }
        };

        Duration::from_millis(delay_ms as u64) + self.calculate_jitter()
    }

    /// Generates random jitter between 0 and `MAX_JITTER`.
    ///
    /// Jitter spreads out retries when many documents fail at the same time
    /// against the same host.
    fn calculate_jitter(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}
