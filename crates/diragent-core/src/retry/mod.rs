//! Retry strategies and backoff implementations.
//!
//! This module provides a universal abstraction for retry logic with exponential
//! backoff and jitter, plus the stateful schedule a reconnect loop keeps
//! between sessions.
//!
//! # Key Types
//!
//! - [`BackoffStrategy`] - Core trait for retry strategies
//! - [`ExponentialBackoff`] - Exponential backoff with jitter
//! - [`BackoffSchedule`] - Failure counter with the long-session reset rule
//!
//! # Examples
//!
//! ```rust
//! use diragent_core::retry::{BackoffStrategy, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), std::io::Error> {
//! let backoff = ExponentialBackoff::builder()
//!     .max_retries(3)
//!     .min_delay(Duration::from_millis(100))
//!     .build();
//!
//! let result = backoff.execute(|| async {
//!     // Your operation here
//!     Ok::<_, std::io::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

mod exponential;
mod schedule;
mod strategy;

pub use exponential::{ExponentialBackoff, ExponentialBackoffBuilder};
pub use schedule::BackoffSchedule;
pub use strategy::BackoffStrategy;
