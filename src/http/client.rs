//! reqwest-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue};

use super::{OutboundRequest, RawResponse, Transport, TransportError};

/// HTTP client performing a single exchange per [`Transport::send`].
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn build(
        &self,
        request: OutboundRequest,
        timeout: Duration,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(timeout);

        if let Some(token) = request.bearer {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Other(format!("invalid credential: {}", e)))?;
            value.set_sensitive(true);
            builder = builder.header(AUTHORIZATION, value);
        }

        for (name, value) in request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Other(format!("invalid header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| TransportError::Other(format!("invalid header value: {}", e)))?;
            builder = builder.header(name, value);
        }

        if let Some(body) = request.body {
            builder = builder.json(&body);
        }

        Ok(builder)
    }
}

#[async_trait]
impl Transport for HttpClient {
    #[tracing::instrument(skip(self, request), fields(url = %request.url))]
    async fn send(
        &self,
        request: OutboundRequest,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        debug!("{} {}...", request.method, request.url);

        let response = self
            .build(request, timeout)?
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        trace!("Response {} with {} bytes", status, body.len());

        Ok(RawResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}
