//! Reliability wrappers for upstream calls
//!
//! This module provides:
//! - [`RetryPolicy`], [`retry`], [`retry_if`] - fixed-delay retries with optional throttle
//! - [`with_timeout`], [`with_timeout_detached`] - bounded waits

mod retry;
mod timeout;

pub use retry::{retry, retry_if, RetryPolicy, DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS, DOCUMENT_THROTTLE};
pub use timeout::{with_timeout, with_timeout_detached, TimeoutError};
