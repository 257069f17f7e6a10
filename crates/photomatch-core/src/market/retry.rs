//! Retry utilities for transient search failures.
//!
//! Provides classification of retryable errors and exponential backoff.

use crate::error::SearchError;
use std::time::Duration;

/// Determine whether a search error is worth retrying.
///
/// Retryable errors: timeouts, transport failures, rate limits (429), server
/// errors (5xx). Non-retryable: image failures, client errors, malformed bodies.
pub fn is_retryable(error: &SearchError) -> bool {
    match error {
        SearchError::Timeout { .. } | SearchError::Transport(_) => true,
        SearchError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
        SearchError::Image(_) | SearchError::Malformed(_) | SearchError::Task(_) => false,
    }
}

/// Calculate exponential backoff duration for a given attempt.
///
/// Uses `base_delay * 2^attempt` with a cap at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(30_000))
}
