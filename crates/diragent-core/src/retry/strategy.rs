//! Retry strategies with exponential backoff and jitter.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// A strategy for retrying failed operations with backoff.
///
/// Implementations determine how long to wait between attempts and when to
/// give up. The relay uses the delay half of this trait through
/// [`BackoffSchedule`](super::BackoffSchedule) for reconnects; background
/// tasks such as credential refresh use [`execute`](Self::execute).
///
/// # Examples
///
/// ```rust
/// use diragent_core::retry::{BackoffStrategy, ExponentialBackoff};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), std::io::Error> {
/// let backoff = ExponentialBackoff::builder()
///     .max_retries(3)
///     .min_delay(Duration::from_millis(100))
///     .build();
///
/// let result = backoff.execute(|| async {
///     // Your async operation here
///     Ok::<_, std::io::Error>(42)
/// }).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait BackoffStrategy: Send + Sync {
    /// Execute an operation with retry logic.
    ///
    /// The operation is called repeatedly until it succeeds or the retry
    /// limit is reached. With no limit it is retried until it succeeds, so
    /// callers that need to stop early should race the returned future
    /// against their own cancellation.
    async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: fmt::Display + Send;

    /// Calculate the delay before retry number `attempt` (0-indexed).
    ///
    /// # Returns
    /// - `Some(Duration)`: Wait this long before the next retry
    /// - `None`: No more retries should be attempted
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Maximum number of retries after the initial attempt, `None` for unlimited.
    fn max_retries(&self) -> Option<u32>;

    /// The delay before the first retry.
    fn min_delay(&self) -> Duration;

    /// Upper bound on any delay this strategy produces.
    fn max_delay(&self) -> Duration;
}
