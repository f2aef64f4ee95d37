//! Reliability patterns for activity execution
//!
//! This module provides:
//! - [`RetryPolicy`] - retry with geometric backoff and non-retryable error types

mod retry;

pub use retry::RetryPolicy;
