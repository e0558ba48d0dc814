//! Failure taxonomy for external calls.

use std::fmt;

use crate::client::Attempt;

/// Closed set of failure categories a call can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response within the attempt timeout, a gateway timeout (HTTP 504),
    /// or the call-level deadline elapsed
    Timeout,
    /// Credentials rejected (HTTP 401/403)
    AuthFailure,
    /// Provider asked us to slow down (HTTP 429)
    RateLimited,
    /// Provider temporarily down (HTTP 503 or connection failure)
    ServiceUnavailable,
    /// Request rejected as malformed (other HTTP 4xx)
    BadRequest,
    /// Successful status but the body did not match the expected shape
    ParseFailure,
    /// Any other non-success response the provider gave
    Upstream,
    /// Every provider in the chain failed
    AllProvidersExhausted,
    /// Caller handed over an unusable chain
    ConfigurationError,
    /// Caller cancelled the call
    Cancelled,
}

/// How far a failure reaches once it is observed on an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
    /// Retry the same provider after a backoff.
    Retry,
    /// Stop retrying this provider and fall through to the next one.
    NextProvider,
    /// Stop the whole call.
    AbortChain,
}

impl ErrorKind {
    /// Transient failures are expected to clear up on their own.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::ServiceUnavailable
        )
    }

    pub fn scope(self) -> FailureScope {
        match self {
            ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::ServiceUnavailable => {
                FailureScope::Retry
            }
            ErrorKind::BadRequest | ErrorKind::Upstream => FailureScope::NextProvider,
            ErrorKind::AuthFailure
            | ErrorKind::ParseFailure
            | ErrorKind::AllProvidersExhausted
            | ErrorKind::ConfigurationError
            | ErrorKind::Cancelled => FailureScope::AbortChain,
        }
    }

    /// Stable machine-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::Upstream => "upstream",
            ErrorKind::AllProvidersExhausted => "all_providers_exhausted",
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a call.
///
/// Always carries a kind and a detail string. For
/// [`ErrorKind::AllProvidersExhausted`], `cause` holds the kind observed on
/// the last provider.
#[derive(Debug, Clone)]
pub struct CallError {
    pub kind: ErrorKind,
    pub detail: String,
    pub cause: Option<ErrorKind>,
    pub attempts: Vec<Attempt>,
}

impl CallError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            cause: None,
            attempts: Vec::new(),
        }
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationError, detail)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "call cancelled by caller")
    }

    /// Wrap the failure seen on the last provider of a chain.
    pub fn exhausted(last: CallError) -> Self {
        Self {
            kind: ErrorKind::AllProvidersExhausted,
            detail: last.detail,
            cause: Some(last.kind),
            attempts: Vec::new(),
        }
    }

    pub(crate) fn with_attempts(mut self, attempts: Vec<Attempt>) -> Self {
        self.attempts = attempts;
        self
    }

    /// The kind that actually went wrong, looking through exhaustion.
    pub fn root_kind(&self) -> ErrorKind {
        self.cause.unwrap_or(self.kind)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            Some(cause) => write!(f, "{} (last: {}): {}", self.kind, cause, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

impl std::error::Error for CallError {}
