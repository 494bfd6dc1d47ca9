//! Reliability patterns for durable execution
//!
//! - [`RetryPolicy`] - Configurable retry with exponential backoff

mod retry;

pub use retry::RetryPolicy;
