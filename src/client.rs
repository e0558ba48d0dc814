//! Resilient call path: per-attempt timeout, retry with backoff, failure
//! classification and fallback across a provider chain.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{CallError, ErrorKind, FailureScope};
use crate::http::{
    OutboundRequest, RawResponse, RetryPolicy, Transport, classify_status, classify_transport,
    error_detail,
};
use crate::provider::{self, Adapter, ProviderConfig};
use crate::request::{Generated, Payload, Request};
use crate::runtime::Runtime;

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed { kind: ErrorKind, detail: String },
}

/// One HTTP call made on behalf of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub provider: String,
    /// 1-based, counted per provider
    pub sequence: u32,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

impl Attempt {
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }

    /// The failure kind, if the attempt failed.
    pub fn kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            AttemptOutcome::Success => None,
            AttemptOutcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Successful result of a call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub output: Generated,
    /// Name of the provider that served the request
    pub provider: String,
    pub attempts: Vec<Attempt>,
}

/// Calls external providers with timeout, retry and fallback.
pub struct ResilientClient<T: Transport, R: Runtime> {
    transport: T,
    runtime: R,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<T: Transport, R: Runtime> ResilientClient<T, R> {
    pub fn new(transport: T, runtime: R, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            transport,
            runtime,
            policy,
            timeout,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Runs `request` against `chain` in order until one provider succeeds.
    ///
    /// Transient failures are retried on the same provider with backoff.
    /// `BadRequest` and `Upstream` move on to the next provider. Auth and
    /// parse failures stop the whole call. Cancelling `cancel` stops the call
    /// at the next suspension point with [`ErrorKind::Cancelled`].
    #[tracing::instrument(
        skip(self, request, chain, cancel),
        fields(capability = %request.payload.capability(), providers = chain.len())
    )]
    pub async fn call(
        &self,
        request: &Request,
        chain: &[Arc<ProviderConfig>],
        cancel: &CancellationToken,
    ) -> Result<CallOutcome, CallError> {
        check_chain(&request.payload, chain)?;

        let mut attempts = Vec::new();
        let result = match request.options.deadline {
            Some(deadline) => {
                let run = self.run_chain(request, chain, cancel, &mut attempts);
                match tokio::time::timeout(deadline, run).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Call deadline of {:?} elapsed", deadline);
                        Err(CallError::new(
                            ErrorKind::Timeout,
                            format!("call deadline of {:?} elapsed", deadline),
                        ))
                    }
                }
            }
            None => self.run_chain(request, chain, cancel, &mut attempts).await,
        };

        match result {
            Ok((output, provider)) => Ok(CallOutcome {
                output,
                provider,
                attempts,
            }),
            Err(err) => Err(err.with_attempts(attempts)),
        }
    }

    /// Sends one unretried health request to `provider` and returns the
    /// round-trip time.
    #[tracing::instrument(skip(self, provider, cancel), fields(provider = %provider.name))]
    pub async fn probe(
        &self,
        provider: &ProviderConfig,
        cancel: &CancellationToken,
    ) -> Result<Duration, CallError> {
        let adapter = provider::adapter(provider.kind);
        let outbound = provider.decorate(adapter.probe(provider));
        let timeout = provider.timeout().unwrap_or(self.timeout);

        let started = Instant::now();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::cancelled()),
            response = self.send(outbound, timeout) => response?,
        };
        match classify_status(response.status) {
            Some(kind) => Err(CallError::new(kind, error_detail(&response))),
            None => Ok(started.elapsed()),
        }
    }

    async fn run_chain(
        &self,
        request: &Request,
        chain: &[Arc<ProviderConfig>],
        cancel: &CancellationToken,
        attempts: &mut Vec<Attempt>,
    ) -> Result<(Generated, String), CallError> {
        let policy = match request.options.max_retries {
            Some(max_retries) => RetryPolicy {
                max_retries,
                ..self.policy
            },
            None => self.policy,
        };

        let mut last = None;
        for (index, provider) in chain.iter().enumerate() {
            match self
                .run_provider(request, provider, &policy, cancel, attempts)
                .await
            {
                Ok(output) => return Ok((output, provider.name.clone())),
                Err(err) if err.kind.scope() == FailureScope::AbortChain => return Err(err),
                Err(err) => {
                    if let Some(next) = chain.get(index + 1) {
                        warn!(
                            "Provider {} failed ({}), falling back to {}",
                            provider.name, err.kind, next.name
                        );
                    }
                    last = Some(err);
                }
            }
        }

        Err(match last {
            Some(last) => CallError::exhausted(last),
            None => CallError::configuration("provider chain is empty"),
        })
    }

    async fn run_provider(
        &self,
        request: &Request,
        provider: &ProviderConfig,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        attempts: &mut Vec<Attempt>,
    ) -> Result<Generated, CallError> {
        let adapter = provider::adapter(provider.kind);
        let max_attempts = policy.max_attempts();
        let timeout = request
            .options
            .timeout
            .or_else(|| provider.timeout())
            .unwrap_or(self.timeout);

        let mut sequence = 0;
        loop {
            sequence += 1;

            let delay = policy.delay_before(sequence);
            if !delay.is_zero() {
                debug!(
                    "Waiting {:?} before attempt {}/{} on {}",
                    delay, sequence, max_attempts, provider.name
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CallError::cancelled()),
                    _ = self.runtime.sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(CallError::cancelled());
            }

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CallError::cancelled()),
                result = self.attempt(adapter, provider, &request.payload, timeout) => result,
            };
            let elapsed = started.elapsed();

            match result {
                Ok(output) => {
                    info!(
                        "[{}] attempt {}/{} succeeded in {:?}",
                        provider.name, sequence, max_attempts, elapsed
                    );
                    attempts.push(Attempt {
                        provider: provider.name.clone(),
                        sequence,
                        elapsed,
                        outcome: AttemptOutcome::Success,
                    });
                    return Ok(output);
                }
                Err(err) => {
                    warn!(
                        "[{}] attempt {}/{} failed after {:?}: {}",
                        provider.name, sequence, max_attempts, elapsed, err
                    );
                    attempts.push(Attempt {
                        provider: provider.name.clone(),
                        sequence,
                        elapsed,
                        outcome: AttemptOutcome::Failed {
                            kind: err.kind,
                            detail: err.detail.clone(),
                        },
                    });
                    if !err.kind.is_transient() || sequence >= max_attempts {
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        adapter: &dyn Adapter,
        provider: &ProviderConfig,
        payload: &Payload,
        timeout: Duration,
    ) -> Result<Generated, CallError> {
        let outbound = adapter
            .build(provider, payload)
            .map_err(|detail| CallError::new(ErrorKind::BadRequest, detail))?;
        let response = self.send(provider.decorate(outbound), timeout).await?;

        if let Some(kind) = classify_status(response.status) {
            return Err(CallError::new(kind, error_detail(&response)));
        }
        adapter
            .parse(&response)
            .map_err(|detail| CallError::new(ErrorKind::ParseFailure, detail))
    }

    /// Sends with a hard timeout on top of whatever the transport enforces.
    async fn send(
        &self,
        outbound: OutboundRequest,
        timeout: Duration,
    ) -> Result<RawResponse, CallError> {
        match tokio::time::timeout(timeout, self.transport.send(outbound, timeout)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(classify_transport(err)),
            Err(_) => Err(CallError::new(
                ErrorKind::Timeout,
                format!("no response within {:?}", timeout),
            )),
        }
    }
}

fn check_chain(payload: &Payload, chain: &[Arc<ProviderConfig>]) -> Result<(), CallError> {
    if chain.is_empty() {
        return Err(CallError::configuration("provider chain is empty"));
    }
    let needed = payload.capability();
    if let Some(provider) = chain.iter().find(|p| p.capability != needed) {
        return Err(CallError::configuration(format!(
            "provider '{}' serves {} but the request needs {}",
            provider.name, provider.capability, needed
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{MockTransport, TransportError};
    use crate::provider::{Capability, ProviderKind};
    use crate::request::{ChatPayload, ImagePayload};
    use crate::runtime::{MockRuntime, RealRuntime};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    const CHAT_OK: &str = r#"{"choices":[{"message":{"role":"assistant","content":"a red fox"}}]}"#;
    const WEBUI_OK: &str = r#"{"images":["iVBORw0KGgo="]}"#;

    fn chat_provider(name: &str) -> Arc<ProviderConfig> {
        Arc::new(
            ProviderConfig::new(
                name,
                ProviderKind::OpenRouter,
                format!("https://{}.example.com/api/v1", name),
                Capability::Analyze,
            )
            .credential("sk-test"),
        )
    }

    fn webui_provider(name: &str) -> Arc<ProviderConfig> {
        Arc::new(ProviderConfig::new(
            name,
            ProviderKind::WebUi,
            format!("http://{}.local:7860", name),
            Capability::Generate,
        ))
    }

    fn chat_request() -> Request {
        Request::chat(ChatPayload::text("describe"))
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_millis(100),
            Duration::from_millis(250),
        )
    }

    fn sleeping_runtime() -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime.expect_sleep().returning(|_| ());
        runtime
    }

    fn client<T: Transport>(
        transport: T,
        runtime: MockRuntime,
        max_retries: u32,
    ) -> ResilientClient<T, MockRuntime> {
        ResilientClient::new(transport, runtime, policy(max_retries), Duration::from_secs(5))
    }

    /// Never answers.
    struct StalledTransport {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for StalledTransport {
        async fn send(
            &self,
            _request: OutboundRequest,
            _timeout: Duration,
        ) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_success_on_first_attempt() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req, timeout| {
                req.url == "https://a.example.com/api/v1/chat/completions"
                    && req.bearer.as_deref() == Some("sk-test")
                    && *timeout == Duration::from_secs(5)
            })
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(200, CHAT_OK)));

        let mut runtime = MockRuntime::new();
        runtime.expect_sleep().never();

        let client = client(transport, runtime, 3);
        let outcome = client
            .call(&chat_request(), &[chat_provider("a")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.provider, "a");
        assert_eq!(outcome.output.into_text().unwrap(), "a red fox");
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.attempts[0].is_success());
        assert_eq!(outcome.attempts[0].sequence, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_transient_failures_exhaust_retry_budget() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(4)
            .returning(|_, _| Ok(RawResponse::json(503, r#"{"error":"overloaded"}"#)));

        let client = client(transport, sleeping_runtime(), 3);
        let err = client
            .call(&chat_request(), &[chat_provider("a")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::AllProvidersExhausted);
        assert_eq!(err.cause, Some(ErrorKind::ServiceUnavailable));
        assert_eq!(err.detail, "HTTP 503: overloaded");
        assert_eq!(err.attempts.len(), 4);
        let sequences: Vec<u32> = err.attempts.iter().map(|a| a.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_request_max_retries_override() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|_, _| Ok(RawResponse::json(429, "")));

        let client = client(transport, sleeping_runtime(), 3);
        let request = chat_request().max_retries(1);
        let err = client
            .call(&request, &[chat_provider("a")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.root_kind(), ErrorKind::RateLimited);
        assert_eq!(err.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_chain() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req, _| req.url.starts_with("https://a."))
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(401, r#"{"error":{"message":"bad key"}}"#)));
        transport
            .expect_send()
            .withf(|req, _| req.url.starts_with("https://b."))
            .never();

        let mut runtime = MockRuntime::new();
        runtime.expect_sleep().never();

        let client = client(transport, runtime, 3);
        let err = client
            .call(
                &chat_request(),
                &[chat_provider("a"), chat_provider("b")],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::AuthFailure);
        assert_eq!(err.detail, "HTTP 401: bad key");
        assert_eq!(err.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_backoff_delays_follow_policy() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(5)
            .returning(|_, _| Ok(RawResponse::json(429, "")));

        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = delays.clone();
        let mut runtime = MockRuntime::new();
        runtime
            .expect_sleep()
            .times(4)
            .returning(move |d| recorded.lock().unwrap().push(d));

        let client = client(transport, runtime, 4);
        let _ = client
            .call(&chat_request(), &[chat_provider("a")], &CancellationToken::new())
            .await;

        // base 100ms, cap 250ms
        assert_eq!(
            *delays.lock().unwrap(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250),
                Duration::from_millis(250),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_retrying() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(503, "")));

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut runtime = MockRuntime::new();
        runtime
            .expect_sleep()
            .times(1)
            .returning(move |_| token.cancel());

        let client = client(transport, runtime, 3);
        let err = client
            .call(&chat_request(), &[chat_provider("a")], &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_sleeping_on_real_clock() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(503, "")));

        let client = ResilientClient::new(
            transport,
            RealRuntime,
            RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(30)),
            Duration::from_secs(5),
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let started = Instant::now();
        let err = client
            .call(&chat_request(), &[chat_provider("a")], &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight_attempt() {
        let transport = StalledTransport {
            calls: AtomicU32::new(0),
        };
        let client = ResilientClient::new(
            transport,
            RealRuntime,
            policy(3),
            Duration::from_secs(60),
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            token.cancel();
        });

        let err = client
            .call(&chat_request(), &[chat_provider("a")], &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.attempts.len(), 1);
        assert_eq!(err.attempts[0].kind(), Some(ErrorKind::Cancelled));
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let mut transport = MockTransport::new();
        transport.expect_send().never();

        let client = client(transport, MockRuntime::new(), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .call(&chat_request(), &[chat_provider("a")], &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(err.attempts.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_fallback_to_next_provider() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req, _| req.url.starts_with("http://a."))
            .times(4)
            .returning(|_, _| Ok(RawResponse::json(503, "")));
        transport
            .expect_send()
            .withf(|req, _| req.url == "http://b.local:7860/sdapi/v1/txt2img")
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(200, WEBUI_OK)));

        let client = client(transport, sleeping_runtime(), 3);
        let outcome = client
            .call(
                &Request::image(ImagePayload::new("a lighthouse")),
                &[webui_provider("a"), webui_provider("b")],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.provider, "b");
        assert_eq!(outcome.output.into_images().unwrap().len(), 1);
        assert_eq!(outcome.attempts.len(), 5);
        let on_a = outcome.attempts.iter().filter(|a| a.provider == "a").count();
        assert_eq!(on_a, 4);
        assert_eq!(outcome.attempts[4].sequence, 1);
    }

    #[tokio::test]
    async fn test_bad_request_falls_through_without_retry() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req, _| req.url.starts_with("https://a."))
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(422, r#"{"detail":"bad size"}"#)));
        transport
            .expect_send()
            .withf(|req, _| req.url.starts_with("https://b."))
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(200, CHAT_OK)));

        let mut runtime = MockRuntime::new();
        runtime.expect_sleep().never();

        let client = client(transport, runtime, 3);
        let outcome = client
            .call(
                &chat_request(),
                &[chat_provider("a"), chat_provider("b")],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.provider, "b");
        assert_eq!(outcome.attempts[0].kind(), Some(ErrorKind::BadRequest));
    }

    #[tokio::test]
    async fn test_upstream_error_on_last_provider_exhausts() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|_, _| Ok(RawResponse::json(500, "Internal Server Error")));

        let client = client(transport, sleeping_runtime(), 3);
        let err = client
            .call(
                &chat_request(),
                &[chat_provider("a"), chat_provider("b")],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::AllProvidersExhausted);
        assert_eq!(err.cause, Some(ErrorKind::Upstream));
        assert_eq!(err.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_chain_is_configuration_error() {
        let mut transport = MockTransport::new();
        transport.expect_send().never();

        let client = client(transport, MockRuntime::new(), 3);
        let err = client
            .call(&chat_request(), &[], &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ConfigurationError);
        assert!(err.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_capability_mismatch_is_configuration_error() {
        let mut transport = MockTransport::new();
        transport.expect_send().never();

        let client = client(transport, MockRuntime::new(), 3);
        let err = client
            .call(
                &chat_request(),
                &[chat_provider("a"), webui_provider("sd")],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ConfigurationError);
        assert!(err.detail.contains("sd"));
        assert!(err.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_success_is_parse_failure() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(200, "<html>not json</html>")));

        let mut runtime = MockRuntime::new();
        runtime.expect_sleep().never();

        let client = client(transport, runtime, 3);
        let err = client
            .call(
                &chat_request(),
                &[chat_provider("a"), chat_provider("b")],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ParseFailure);
        assert_eq!(err.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_is_retried() {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(TransportError::Connect("refused".into())));
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(RawResponse::json(200, CHAT_OK)));

        let client = client(transport, sleeping_runtime(), 3);
        let outcome = client
            .call(&chat_request(), &[chat_provider("a")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(
            outcome.attempts[0].kind(),
            Some(ErrorKind::ServiceUnavailable)
        );
        assert!(outcome.attempts[1].is_success());
    }

    #[tokio::test]
    async fn test_timeout_precedence() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req, timeout| req.url.starts_with("https://a.") && *timeout == Duration::from_secs(7))
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(200, CHAT_OK)));
        transport
            .expect_send()
            .withf(|req, timeout| req.url.starts_with("https://b.") && *timeout == Duration::from_secs(2))
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(200, CHAT_OK)));

        let client = client(transport, MockRuntime::new(), 0);
        let cancel = CancellationToken::new();

        let mut provider = (*chat_provider("a")).clone();
        provider.timeout_secs = Some(7);
        client
            .call(&chat_request(), &[Arc::new(provider.clone())], &cancel)
            .await
            .unwrap();

        provider.name = "b".into();
        provider.base_url = "https://b.example.com/api/v1".into();
        let request = chat_request().timeout(Duration::from_secs(2));
        client
            .call(&request, &[Arc::new(provider)], &cancel)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let transport = StalledTransport {
            calls: AtomicU32::new(0),
        };
        let client = ResilientClient::new(
            transport,
            RealRuntime,
            RetryPolicy::new(1, Duration::from_secs(1), Duration::from_secs(1)),
            Duration::from_secs(3),
        );

        let err = client
            .call(&chat_request(), &[chat_provider("a")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::AllProvidersExhausted);
        assert_eq!(err.cause, Some(ErrorKind::Timeout));
        assert_eq!(err.attempts.len(), 2);
        assert!(err.attempts[0].elapsed >= Duration::from_secs(3));
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_deadline_bounds_whole_chain() {
        let transport = StalledTransport {
            calls: AtomicU32::new(0),
        };
        let client = ResilientClient::new(
            transport,
            RealRuntime,
            RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(1)),
            Duration::from_secs(10),
        );

        let started = Instant::now();
        let request = chat_request().deadline(Duration::from_secs(15));
        let err = client
            .call(&request, &[chat_provider("a")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.detail.contains("deadline"));
        assert_eq!(err.attempts.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(16));
    }

    #[tokio::test]
    async fn test_extra_headers_are_sent() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req, _| {
                req.headers
                    .iter()
                    .any(|(k, v)| k == "X-Title" && v == "Avatar Generator")
            })
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(200, CHAT_OK)));

        let provider = (*chat_provider("a")).clone().header("X-Title", "Avatar Generator");
        let client = client(transport, MockRuntime::new(), 0);
        client
            .call(&chat_request(), &[Arc::new(provider)], &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_probe_reports_status() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req, _| {
                req.method == reqwest::Method::GET
                    && req.url == "https://a.example.com/api/v1/models"
            })
            .times(1)
            .returning(|_, _| Ok(RawResponse::json(200, r#"{"data":[]}"#)));
        transport
            .expect_send()
            .withf(|req, _| req.url == "http://sd.local:7860/sdapi/v1/sd-models")
            .times(1)
            .returning(|_, _| Err(TransportError::Connect("refused".into())));

        let mut runtime = MockRuntime::new();
        runtime.expect_sleep().never();
        let client = client(transport, runtime, 3);

        let cancel = CancellationToken::new();
        assert!(client.probe(&chat_provider("a"), &cancel).await.is_ok());
        let err = client
            .probe(&webui_provider("sd"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_each_attempt_is_logged() {
        let calls = AtomicU32::new(0);
        let mut transport = MockTransport::new();
        transport.expect_send().times(2).returning(move |_, _| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(RawResponse::json(503, ""))
            } else {
                Ok(RawResponse::json(200, CHAT_OK))
            }
        });

        let client = client(transport, sleeping_runtime(), 3);
        client
            .call(&chat_request(), &[chat_provider("a")], &CancellationToken::new())
            .await
            .unwrap();

        assert!(logs_contain("[a] attempt 1/4 failed"));
        assert!(logs_contain("[a] attempt 2/4 succeeded"));
        assert!(!logs_contain("[a] attempt 3/4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_probe_of_unresponsive_host() {
        let transport = StalledTransport {
            calls: AtomicU32::new(0),
        };
        let client = ResilientClient::new(
            transport,
            RealRuntime,
            policy(3),
            Duration::from_secs(60),
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            token.cancel();
        });

        let started = Instant::now();
        let err = client
            .probe(&webui_provider("sd"), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 1);
    }
}
