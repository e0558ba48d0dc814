//! Response classification and backoff policy.

use std::time::Duration;

use reqwest::StatusCode;

use super::{RawResponse, TransportError};
use crate::error::{CallError, ErrorKind};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry in milliseconds.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Default upper bound on any single backoff in milliseconds.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;

/// Default per-attempt timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest error body excerpt carried in a failure detail.
const MAX_DETAIL_CHARS: usize = 200;

/// Exponential backoff bounded by a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Total attempts allowed against one provider.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait before `attempt` (1-based).
    ///
    /// Zero for the first attempt, then `min(base * 2^(attempt - 2), cap)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
        )
    }
}

/// Maps an HTTP status to a failure kind, or `None` for success.
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    let status = match StatusCode::from_u16(status) {
        Ok(status) => status,
        Err(_) => return Some(ErrorKind::Upstream),
    };

    match status {
        s if s.is_success() => None,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(ErrorKind::AuthFailure),
        StatusCode::TOO_MANY_REQUESTS => Some(ErrorKind::RateLimited),
        StatusCode::SERVICE_UNAVAILABLE => Some(ErrorKind::ServiceUnavailable),
        StatusCode::GATEWAY_TIMEOUT => Some(ErrorKind::Timeout),
        s if s.is_client_error() => Some(ErrorKind::BadRequest),
        _ => Some(ErrorKind::Upstream),
    }
}

/// Maps a transport failure to a call failure.
pub fn classify_transport(error: TransportError) -> CallError {
    let kind = match error {
        TransportError::Timeout(_) => ErrorKind::Timeout,
        TransportError::Connect(_) => ErrorKind::ServiceUnavailable,
        TransportError::Other(_) => ErrorKind::Upstream,
    };
    CallError::new(kind, error.to_string())
}

/// Builds a short, human-readable detail from an error response.
///
/// Understands the common JSON error envelopes (`{"error": {"message": ..}}`,
/// `{"error": ".."}`, `{"message": ..}`, `{"detail": ..}`) and falls back to
/// the raw body.
pub fn error_detail(response: &RawResponse) -> String {
    let message = serde_json::from_slice::<serde_json::Value>(&response.body)
        .ok()
        .and_then(|value| json_message(&value))
        .unwrap_or_else(|| response.text().trim().to_string());

    if message.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        format!("HTTP {}: {}", response.status, truncate(&message))
    }
}

fn json_message(value: &serde_json::Value) -> Option<String> {
    let error = value.get("error");
    let candidates = [
        error.and_then(|e| e.get("message")),
        error,
        value.get("message"),
        value.get("detail"),
    ];
    candidates.into_iter().flatten().find_map(|v| match v {
        serde_json::Value::String(s) => Some(s.clone()),
        _ => None,
    })
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_DETAIL_CHARS {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAX_DETAIL_CHARS).collect();
    truncated.push_str("...");
    truncated
}
