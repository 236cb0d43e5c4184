//! Exponential backoff with jitter.

use super::strategy::BackoffStrategy;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff strategy with configurable jitter.
///
/// Delays between retries increase exponentially: `min_delay * multiplier^attempt`,
/// capped at `max_delay`. Jitter only ever lengthens a delay, and never by
/// more than one multiplier step, so consecutive delays are non-decreasing.
///
/// # Mathematical Formula
///
/// For attempt `n` (0-indexed after first failure):
/// ```text
/// base_delay  = min_delay * (multiplier ^ n)
/// jittered    = base_delay * (1 + jitter * random[0, 1))
/// final_delay = min(jittered, max_delay)
/// ```
/// with `jitter` clamped to `[0, multiplier - 1]`.
///
/// # Examples
///
/// ```rust
/// use diragent_core::retry::{BackoffStrategy, ExponentialBackoff};
/// use std::time::Duration;
///
/// // Relay defaults: 1s min, 60s max, doubling, 10% jitter, never give up
/// let backoff = ExponentialBackoff::default();
/// assert_eq!(backoff.max_retries(), None);
///
/// let backoff = ExponentialBackoff::builder()
///     .min_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(30))
///     .multiplier(2.0)
///     .jitter(0.0)
///     .build();
/// assert_eq!(backoff.next_delay(2), Some(Duration::from_millis(400)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    max_retries: Option<u32>,
    min_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Default delay before the first retry
    pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);

    /// Default upper bound on a single delay
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

    /// Create a new builder for configuring exponential backoff.
    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }

    /// Growth factor between consecutive delays
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Effective jitter fraction after clamping
    pub fn jitter(&self) -> f64 {
        self.jitter
    }
}

impl Default for ExponentialBackoff {
    /// Create an exponential backoff with the relay's defaults.
    ///
    /// Defaults:
    /// - `max_retries`: unlimited
    /// - `min_delay`: 1s
    /// - `max_delay`: 60s
    /// - `multiplier`: 2.0 (doubles each time)
    /// - `jitter`: 0.1 (up to 10% longer)
    fn default() -> Self {
        ExponentialBackoffBuilder::default().build()
    }
}

#[async_trait]
impl BackoffStrategy for ExponentialBackoff {
    async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: fmt::Display + Send,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if self.max_retries.is_some_and(|max| attempt >= max) => {
                    return Err(err);
                }
                Err(err) => {
                    let Some(delay) = self.next_delay(attempt) else {
                        return Err(err);
                    };
                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt, ?delay, error = %err, "operation failed, retrying");
                    #[cfg(not(feature = "tracing"))]
                    drop(err);
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| attempt >= max) {
            return None;
        }

        let max = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.min_delay.as_secs_f64() * self.multiplier.powi(exponent);

        let jittered = if self.jitter > 0.0 {
            base_delay * (1.0 + self.jitter * rand::random::<f64>())
        } else {
            base_delay
        };

        // f64::min discards NaN, and overflow to infinity lands on the cap
        Some(Duration::from_secs_f64(jittered.min(max).max(0.0)))
    }

    fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    fn min_delay(&self) -> Duration {
        self.min_delay
    }

    fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

/// Builder for configuring `ExponentialBackoff`.
///
/// Provides a fluent API for setting retry parameters.
///
/// # Examples
///
/// ```rust
/// use diragent_core::retry::{BackoffStrategy, ExponentialBackoff};
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::builder()
///     .max_retries(5)
///     .min_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(30))
///     .multiplier(2.0)
///     .jitter(0.1)
///     .build();
/// assert_eq!(backoff.max_retries(), Some(5));
/// ```
#[derive(Debug, Default)]
pub struct ExponentialBackoffBuilder {
    max_retries: Option<u32>,
    min_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
}

impl ExponentialBackoffBuilder {
    /// Limit the number of retries after the initial attempt.
    ///
    /// Default: unlimited
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the delay before the first retry.
    ///
    /// Default: 1s
    pub fn min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = Some(delay);
        self
    }

    /// Set the maximum delay between retries.
    ///
    /// Default: 60s. Raised to `min_delay` if smaller.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the exponential multiplier.
    ///
    /// Default: 2.0. Values below 1.0 are raised to 1.0.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Set the jitter factor.
    ///
    /// A jitter of 0.1 lengthens each delay by up to 10%. Clamped to
    /// `[0, multiplier - 1]` at build time.
    ///
    /// Default: 0.1
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the `ExponentialBackoff` instance.
    ///
    /// Uses default values for any unset parameters.
    pub fn build(self) -> ExponentialBackoff {
        let min_delay = self
            .min_delay
            .unwrap_or(ExponentialBackoff::DEFAULT_MIN_DELAY);
        let max_delay = self
            .max_delay
            .unwrap_or(ExponentialBackoff::DEFAULT_MAX_DELAY)
            .max(min_delay);
        let multiplier = match self.multiplier {
            Some(m) if m.is_finite() => m.max(1.0),
            _ => 2.0,
        };
        let jitter = match self.jitter {
            Some(j) if j.is_finite() => j,
            _ => 0.1,
        };

        ExponentialBackoff {
            max_retries: self.max_retries,
            min_delay,
            max_delay,
            multiplier,
            jitter: jitter.clamp(0.0, (multiplier - 1.0).min(1.0)),
        }
    }
}
