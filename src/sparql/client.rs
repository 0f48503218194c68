//! SPARQL endpoint client.
//!
//! Two layers:
//! 1. `SparqlTransport`: one HTTP exchange, no policy. `HttpTransport` is the
//!    reqwest implementation; tests plug in a scripted one.
//! 2. `EndpointClient`: status classification, bounded retry with
//!    exponential backoff, and the shared `RateLimiter`.
//!
//! The client never turns an exhausted retry budget into an empty result: the
//! last transient error is returned and the caller decides what absence means.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::sparql::limiter::RateLimiter;
use crate::sparql::{Binding, SparqlResponse};

/// Queries longer than this (URL-encoded) go out as a form POST.
const MAX_GET_QUERY_BYTES: usize = 6_000;

/// Longest error body excerpt kept in `BadRequest` messages.
const ERROR_EXCERPT_CHARS: usize = 300;

/// Raw outcome of one HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

impl TransportReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: String::new(),
        }
    }
}

#[async_trait]
pub trait SparqlTransport: Send + Sync {
    /// Send `query` once, asking for `accept`. Only transport-level failures
    /// (connect, timeout) are errors; every HTTP status is a reply.
    async fn send(&self, query: &str, accept: &str) -> Result<TransportReply, ResolveError>;
}

/// reqwest-backed transport for a real endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        endpoint: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl SparqlTransport for HttpTransport {
    async fn send(&self, query: &str, accept: &str) -> Result<TransportReply, ResolveError> {
        let params = [("query", query), ("format", "json")];
        let encoded_len = url::form_urlencoded::byte_serialize(query.as_bytes())
            .map(str::len)
            .sum::<usize>();

        let request = if encoded_len > MAX_GET_QUERY_BYTES {
            self.client.post(&self.endpoint).form(&params)
        } else {
            self.client.get(&self.endpoint).query(&params)
        };

        let response = request
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.text().await?;

        Ok(TransportReply {
            status,
            retry_after,
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Upper bound applied to a server-sent `Retry-After`.
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_max_retry_after_secs() -> u64 {
    120
}

fn default_jitter_ms() -> u64 {
    150
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retry_after_secs: default_max_retry_after_secs(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            max_retry_after_secs: 0,
            jitter_ms: 0,
        }
    }

    /// Same policy with `retries` retries after the first attempt.
    pub fn with_retries(&self, retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..self.clone()
        }
    }
}

fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map an HTTP reply onto bindings or a classified error.
fn classify_reply(reply: TransportReply) -> Result<Vec<Binding>, ResolveError> {
    match reply.status {
        200..=299 => {
            let parsed: SparqlResponse = serde_json::from_str(&reply.body)?;
            Ok(parsed.into_bindings())
        }
        429 => Err(ResolveError::RateLimited {
            retry_after: parse_retry_after(reply.retry_after.as_deref()),
        }),
        408 => Err(ResolveError::Timeout(format!("HTTP {}", reply.status))),
        401 | 403 => Err(ResolveError::Unauthorized {
            status: reply.status,
        }),
        status if status >= 500 => Err(ResolveError::ServerError {
            status,
            retry_after: parse_retry_after(reply.retry_after.as_deref()),
        }),
        status => Err(ResolveError::BadRequest {
            status,
            message: reply.body.chars().take(ERROR_EXCERPT_CHARS).collect(),
        }),
    }
}

fn retry_delay(attempt: u32, policy: &RetryPolicy, retry_after: Option<Duration>) -> Duration {
    if let Some(server_delay) = retry_after {
        return server_delay.min(Duration::from_secs(policy.max_retry_after_secs));
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = if policy.jitter_ms == 0 {
        0
    } else {
        (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0))
            % policy.jitter_ms
    };
    Duration::from_millis(base.saturating_add(jitter))
}

/// Endpoint access with retry and shared rate limiting.
pub struct EndpointClient {
    transport: Arc<dyn SparqlTransport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl EndpointClient {
    pub fn new(
        transport: Arc<dyn SparqlTransport>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            policy,
        }
    }

    /// Client for the configured endpoint over HTTP.
    pub fn from_config(
        config: &ResolverConfig,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ResolveError> {
        config.validate()?;
        let transport = HttpTransport::new(
            &config.endpoint,
            &config.user_agent,
            config.request_timeout(),
        )?;
        Ok(Self::new(Arc::new(transport), limiter, config.retry.clone()))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn execute(&self, query: &str, accept: &str) -> Result<Vec<Binding>, ResolveError> {
        self.execute_with(query, accept, &self.policy).await
    }

    /// Run `query` under an explicit retry policy.
    pub async fn execute_with(
        &self,
        query: &str,
        accept: &str,
        policy: &RetryPolicy,
    ) -> Result<Vec<Binding>, ResolveError> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.limiter.acquire().await;

            let outcome = match self.transport.send(query, accept).await {
                Ok(reply) => classify_reply(reply),
                Err(err) => Err(err),
            };

            let err = match outcome {
                Ok(bindings) => {
                    log::debug!("sparql: {} rows (attempt {})", bindings.len(), attempt);
                    return Ok(bindings);
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= attempts {
                if err.is_retryable() {
                    log::warn!("sparql: giving up after {} attempts: {}", attempt, err);
                }
                return Err(err);
            }

            let server_delay = err.retry_after();
            let delay = retry_delay(attempt, policy, server_delay);
            log::warn!(
                "sparql retry {}/{} after {} (sleep {:?})",
                attempt,
                attempts,
                err,
                delay
            );
            if server_delay.is_some() || matches!(err, ResolveError::RateLimited { .. }) {
                // Every caller backs off, not just this one.
                self.limiter.cool_down(delay);
            } else if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::stub::*;
    use super::*;
    use crate::sparql::SPARQL_JSON;

    fn one_row() -> String {
        bindings_body(&[vec![
            ("person", "http://www.wikidata.org/entity/Q5582"),
            ("personLabel", "Vincent van Gogh"),
        ]])
    }

    #[tokio::test]
    async fn test_success_returns_bindings() {
        let body = one_row();
        let transport = Arc::new(ScriptedTransport::new(move |_, _| {
            Ok(TransportReply::ok(body.clone()))
        }));
        let client = client(transport.clone(), 3);

        let rows = client.execute("SELECT", SPARQL_JSON).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["personLabel"].value, "Vincent van Gogh");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let body = one_row();
        let transport = Arc::new(ScriptedTransport::new(move |_, call| match call {
            0 => Ok(TransportReply::status(503)),
            1 => Ok(TransportReply::status(429)),
            _ => Ok(TransportReply::ok(body.clone())),
        }));
        let client = client(transport.clone(), 3);

        let rows = client.execute("SELECT", SPARQL_JSON).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_transient_error() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| {
            Ok(TransportReply::status(502))
        }));
        let client = client(transport.clone(), 3);

        let err = client.execute("SELECT", SPARQL_JSON).await.unwrap_err();
        assert!(matches!(err, ResolveError::ServerError { status: 502, .. }));
        assert!(err.is_retryable());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_fatal_status_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| {
            Ok(TransportReply {
                status: 400,
                retry_after: None,
                body: "MalformedQueryException: Encountered \" \"}\" ".to_string(),
            })
        }));
        let client = client(transport.clone(), 5);

        let err = client.execute("SELECT {", SPARQL_JSON).await.unwrap_err();
        match err {
            ResolveError::BadRequest { status, message } => {
                assert_eq!(status, 400);
                assert!(message.starts_with("MalformedQueryException"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_follow_classification() {
        let transport = Arc::new(ScriptedTransport::new(|_, call| {
            if call == 0 {
                Err(ResolveError::Network("connection reset".to_string()))
            } else {
                Ok(TransportReply::ok(empty_body()))
            }
        }));
        let client = client(transport.clone(), 2);
        assert!(client.execute("SELECT", SPARQL_JSON).await.unwrap().is_empty());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| {
            Ok(TransportReply::ok("<html>maintenance</html>"))
        }));
        let client = client(transport.clone(), 3);
        let err = client.execute("SELECT", SPARQL_JSON).await.unwrap_err();
        assert!(matches!(err, ResolveError::Decode(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_cools_down_shared_limiter() {
        let body = one_row();
        let transport = Arc::new(ScriptedTransport::new(move |_, call| {
            if call == 0 {
                Ok(TransportReply {
                    status: 429,
                    retry_after: Some("7".to_string()),
                    body: String::new(),
                })
            } else {
                Ok(TransportReply::ok(body.clone()))
            }
        }));
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
        let policy = RetryPolicy {
            jitter_ms: 0,
            ..RetryPolicy::default()
        };
        let client = EndpointClient::new(transport.clone(), limiter.clone(), policy);

        let start = tokio::time::Instant::now();
        client.execute("SELECT", SPARQL_JSON).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert_eq!(limiter.stats().cool_downs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_with_retry_after_cools_down_shared_limiter() {
        let body = one_row();
        let transport = Arc::new(ScriptedTransport::new(move |_, call| {
            if call == 0 {
                Ok(TransportReply {
                    status: 503,
                    retry_after: Some("7".to_string()),
                    body: String::new(),
                })
            } else {
                Ok(TransportReply::ok(body.clone()))
            }
        }));
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
        let policy = RetryPolicy {
            jitter_ms: 0,
            ..RetryPolicy::default()
        };
        let client = EndpointClient::new(transport.clone(), limiter.clone(), policy);

        let start = tokio::time::Instant::now();
        let rows = client.execute("SELECT", SPARQL_JSON).await.unwrap();
        assert_eq!(rows.len(), 1);
        // Server delay replaces the 1s computed backoff.
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert_eq!(limiter.stats().cool_downs, 1);
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn test_retry_delay_backoff_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 3_000,
            max_retry_after_secs: 30,
            jitter_ms: 0,
        };
        assert_eq!(retry_delay(1, &policy, None), Duration::from_millis(1_000));
        assert_eq!(retry_delay(2, &policy, None), Duration::from_millis(2_000));
        assert_eq!(retry_delay(3, &policy, None), Duration::from_millis(3_000));
        assert_eq!(
            retry_delay(1, &policy, Some(Duration::from_secs(300))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_classify_reply_statuses() {
        assert!(matches!(
            classify_reply(TransportReply::status(408)),
            Err(ResolveError::Timeout(_))
        ));
        assert!(matches!(
            classify_reply(TransportReply::status(403)),
            Err(ResolveError::Unauthorized { status: 403 })
        ));
        assert!(matches!(
            classify_reply(TransportReply::status(404)),
            Err(ResolveError::BadRequest { status: 404, .. })
        ));
        match classify_reply(TransportReply {
            status: 429,
            retry_after: Some(" 12 ".to_string()),
            body: String::new(),
        }) {
            Err(ResolveError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(12)))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_with_retries() {
        let policy = RetryPolicy::default().with_retries(0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(RetryPolicy::default().with_retries(4).max_attempts, 5);
    }
}
