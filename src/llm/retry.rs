//! Shared retry helpers for model providers.
//!
//! Exponential backoff with jitter and transient-status classification,
//! used by every HTTP-backed provider. Credential errors are never retried.

use std::time::Duration;

use rand::Rng;

/// Returns `true` if the HTTP status code is transient and worth retrying.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Exponential backoff delay with +/-25% jitter.
///
/// Base delay is 500ms, doubled each attempt, floored at 100ms.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base_ms: u64 = 500u64.saturating_mul(2u64.saturating_pow(attempt));
    let jitter_range = base_ms / 4;
    let jitter = if jitter_range > 0 {
        let offset = rand::thread_rng().gen_range(0..=jitter_range * 2);
        offset as i64 - jitter_range as i64
    } else {
        0
    };
    let delay_ms = (base_ms as i64 + jitter).max(100) as u64;
    Duration::from_millis(delay_ms)
}
