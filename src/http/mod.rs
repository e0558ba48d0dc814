//! HTTP transport with timeout handling and response classification.

mod client;
mod retry;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;

pub use client::HttpClient;
pub use retry::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS,
    RetryPolicy, classify_status, classify_transport, error_detail,
};

/// A fully built request for one attempt.
#[derive(Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    /// Sent as `Authorization: Bearer ...`
    pub bearer: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            bearer: None,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            bearer: None,
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.bearer = token.map(str::to_string);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("bearer", &self.bearer.as_ref().map(|_| "***"))
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Status, content type and body of a response, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: Some("application/json".into()),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failures below the HTTP status level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response in time
    Timeout(String),
    /// Could not reach the host
    Connect(String),
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout(msg) => write!(f, "Request timed out: {}", msg),
            TransportError::Connect(msg) => write!(f, "Connection failed: {}", msg),
            TransportError::Other(msg) => write!(f, "Request failed: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Sends one request and returns the raw response.
///
/// Implementations perform exactly one network exchange per call; retries
/// belong to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: OutboundRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;
}
