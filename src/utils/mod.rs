//! Utility modules.

pub mod retry;
pub mod text;

pub use retry::{RetryConfig, RetryOutcome, Retryable, with_retry};
pub use text::{is_blank, preview};
