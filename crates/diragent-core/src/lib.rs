#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Core abstractions for the directory agent relay.
//!
//! This crate provides the retry primitives shared by the relay's reconnect
//! loop and its background credential refresh:
//!
//! - **Universal retry strategies** via the `BackoffStrategy` trait
//!   - Exponential backoff with bounded, lengthen-only jitter
//!   - Unlimited or capped retry counts
//! - **Reconnect bookkeeping** via `BackoffSchedule`, which resets after a
//!   long healthy session
//!
//! # Examples
//!
//! Using the prelude for convenient imports:
//!
//! ```rust
//! use diragent_core::prelude::*;
//! use std::time::Duration;
//!
//! let mut schedule = BackoffSchedule::new(
//!     ExponentialBackoff::builder()
//!         .min_delay(Duration::from_secs(1))
//!         .max_delay(Duration::from_secs(60))
//!         .build(),
//! );
//!
//! let first = schedule.next_delay();
//! assert!(first >= Duration::from_secs(1));
//! ```

pub mod retry;

/// Convenient re-exports of commonly used items.
///
/// Import all core abstractions with:
///
/// ```rust
/// use diragent_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::retry::{
        BackoffSchedule, BackoffStrategy, ExponentialBackoff, ExponentialBackoffBuilder,
    };
}
