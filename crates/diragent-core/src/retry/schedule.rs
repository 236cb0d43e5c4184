//! Stateful retry counter for long-running reconnect loops.

use super::exponential::ExponentialBackoff;
use super::strategy::BackoffStrategy;
use std::time::Duration;

/// Tracks consecutive failures against a [`BackoffStrategy`].
///
/// A reconnect loop calls [`next_delay`](Self::next_delay) after every
/// failed session and [`record_session`](Self::record_session) with the time
/// the session spent doing useful work. A session that stayed healthy for
/// longer than the strategy's maximum delay clears the penalty accumulated by
/// earlier flapping, so the next failure waits only the minimum delay.
///
/// # Examples
///
/// ```rust
/// use diragent_core::retry::{BackoffSchedule, ExponentialBackoff};
/// use std::time::Duration;
///
/// let mut schedule = BackoffSchedule::new(
///     ExponentialBackoff::builder()
///         .min_delay(Duration::from_secs(1))
///         .max_delay(Duration::from_secs(8))
///         .jitter(0.0)
///         .build(),
/// );
///
/// assert_eq!(schedule.next_delay(), Duration::from_secs(1));
/// assert_eq!(schedule.next_delay(), Duration::from_secs(2));
///
/// // A short session keeps the penalty
/// schedule.record_session(Duration::from_secs(3));
/// assert_eq!(schedule.next_delay(), Duration::from_secs(4));
///
/// // A long one clears it
/// schedule.record_session(Duration::from_secs(9));
/// assert_eq!(schedule.next_delay(), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffSchedule<S = ExponentialBackoff> {
    strategy: S,
    attempt: u32,
}

impl<S: BackoffStrategy> BackoffSchedule<S> {
    /// Start a schedule with no recorded failures
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            attempt: 0,
        }
    }

    /// The underlying strategy
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Consecutive failures since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait after the current failure, advancing the counter
    ///
    /// Never gives up: once the strategy stops producing delays the maximum
    /// delay is used.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .strategy
            .next_delay(self.attempt)
            .unwrap_or_else(|| self.strategy.max_delay());
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Forget all recorded failures
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Account for a session that did useful work for `healthy`
    ///
    /// Returns true when the session was long enough to reset the counter.
    pub fn record_session(&mut self, healthy: Duration) -> bool {
        if healthy > self.strategy.max_delay() {
            self.reset();
            true
        } else {
            false
        }
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}
