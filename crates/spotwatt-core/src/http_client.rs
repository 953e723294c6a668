//! HTTP transport contract and the resilient client built on top of it.
//!
//! [`HttpClient`] is the thin, swappable transport (reqwest in production, a
//! scripted fake in tests). [`ResilientClient`] layers the behaviour every
//! upstream call needs on top of it:
//!
//! ```text
//! request ─▶ TTL cache ─▶ circuit breaker ─▶ [pacer ─▶ attempt (timeout) ─▶ backoff]* ─▶ cache
//! ```

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::{CacheMode, TtlCache, DEFAULT_MAX_ENTRIES};
use crate::circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
use crate::error::RequestError;
use crate::retry::{parse_retry_after, RetryConfig};
use crate::throttling::RequestPacer;

/// Query parameters whose values never reach the logs.
pub const SENSITIVE_PARAMS: &[&str] = &["securityToken", "token", "apikey", "api_key"];

/// Minimal HTTP method set needed by upstream adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// HTTP request envelope used by transport calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: 30_000,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// HTTP response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    message: String,
    timeout: bool,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn is_timeout(&self) -> bool {
        self.timeout
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Transport contract: one request, one response, no policy.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Production HTTP transport using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("spotwatt/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            builder = builder.timeout(Duration::from_millis(request.timeout_ms));

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::timeout(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    HttpError::new(format!("connection failed: {e}"))
                } else {
                    HttpError::new(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_ascii_lowercase(), value.to_owned()))
                })
                .collect();
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::timeout(format!("timeout reading response body: {e}"))
                } else {
                    HttpError::new(format!("failed to read response body: {e}"))
                }
            })?;

            Ok(HttpResponse {
                status,
                body,
                headers,
            })
        })
    }
}

/// Per-call knobs for [`ResilientClient::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query parameters in order; `None` values are omitted from the URL.
    pub params: Vec<(String, Option<String>)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Overrides the client default TTL. Zero disables caching.
    pub cache_ttl: Option<Duration>,
    /// Overrides the default `METHOD:url` cache key.
    pub cache_key: Option<String>,
    /// Overrides the client default per-attempt timeout.
    pub timeout: Option<Duration>,
    pub cache_mode: CacheMode,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), Some(value.into())));
        self
    }

    pub fn optional_param(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.params.push((name.into(), value));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }
}

/// Resilient client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResilientClientConfig {
    /// Name of the upstream; also names the circuit breaker.
    pub name: String,
    pub base_url: String,
    pub default_timeout: Duration,
    pub default_cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub retry: RetryConfig,
    /// Wraps one logical request including all of its retries.
    pub breaker: CircuitBreakerConfig,
    /// Seed for backoff jitter; `None` seeds from the OS.
    pub jitter_seed: Option<u64>,
}

impl ResilientClientConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            default_timeout: Duration::from_secs(30),
            default_cache_ttl: Duration::ZERO,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig {
                call_timeout: Duration::from_secs(5 * 60),
                ..CircuitBreakerConfig::default()
            },
            jitter_seed: None,
        }
    }
}

/// Timeout + pacing + retry/backoff + circuit breaker + response cache around
/// one upstream.
pub struct ResilientClient {
    transport: Arc<dyn HttpClient>,
    config: ResilientClientConfig,
    breaker: Arc<CircuitBreaker>,
    cache: TtlCache<String>,
    pacer: RequestPacer,
    rng: Mutex<fastrand::Rng>,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("config", &self.config)
            .field("breaker", &self.breaker.state())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn HttpClient>, config: ResilientClientConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.name.clone(),
            config.breaker.clone(),
        ));
        let rng = match config.jitter_seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self {
            transport,
            cache: TtlCache::new(config.cache_max_entries),
            breaker,
            pacer: RequestPacer::unlimited(),
            rng: Mutex::new(rng),
            config,
        }
    }

    pub fn with_pacer(mut self, pacer: RequestPacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn config(&self) -> &ResilientClientConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &TtlCache<String> {
        &self.cache
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<String, RequestError> {
        self.request(HttpMethod::Get, path, options).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let body = self.get(path, options).await?;
        serde_json::from_str(&body).map_err(|e| RequestError::Decode {
            message: e.to_string(),
        })
    }

    /// Issues one logical request and returns the response body.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        options: RequestOptions,
    ) -> Result<String, RequestError> {
        let url = build_url(&self.config.base_url, path, &options.params)?;
        let redacted = redact_url(&url, SENSITIVE_PARAMS);

        let ttl = options.cache_ttl.unwrap_or(self.config.default_cache_ttl);
        let cacheable = method == HttpMethod::Get && !ttl.is_zero();
        let cache_key = options
            .cache_key
            .clone()
            .unwrap_or_else(|| format!("{}:{url}", method.as_str()));

        if cacheable && options.cache_mode.reads() {
            if let Some(body) = self.cache.get(&cache_key) {
                debug!(url = %redacted, "serving response from cache");
                return Ok(body);
            }
        }

        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let body = self
            .breaker
            .execute_with(
                || self.send_with_retry(method, &url, &redacted, &options, timeout),
                RequestError::retryable,
            )
            .await
            .map_err(|error| match error {
                BreakerError::Open { name, retry_in } => {
                    RequestError::CircuitOpen { name, retry_in }
                }
                BreakerError::Timeout { after, .. } => RequestError::Timeout { after },
                BreakerError::Inner(error) => error,
            })?;

        if cacheable && options.cache_mode.writes() {
            self.cache.set(cache_key, body.clone(), ttl);
        }

        Ok(body)
    }

    async fn send_with_retry(
        &self,
        method: HttpMethod,
        url: &str,
        redacted: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<String, RequestError> {
        let attempts = self.config.retry.attempts();
        let mut attempt = 0;

        loop {
            self.pacer.acquire().await;
            debug!(url = %redacted, attempt, "sending request");

            let (error, retry_after) = match self.send_once(method, url, options, timeout).await {
                Ok(body) => return Ok(body),
                Err(failure) => failure,
            };

            if attempt + 1 >= attempts || !self.should_retry(&error) {
                return Err(error);
            }

            let delay = {
                let mut rng = self.lock_rng();
                self.config
                    .retry
                    .delay_for_attempt(attempt, retry_after, &mut rng)
            };
            warn!(
                url = %redacted,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "upstream attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send_once(
        &self,
        method: HttpMethod,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<String, (RequestError, Option<Duration>)> {
        let mut request = HttpRequest::new(method, url)
            .with_timeout_ms(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        for (name, value) in &options.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        if let Some(body) = &options.body {
            request = request.with_body(body.clone());
        }

        let response = match tokio::time::timeout(timeout, self.transport.execute(request)).await
        {
            Err(_) => return Err((RequestError::Timeout { after: timeout }, None)),
            Ok(Err(error)) if error.is_timeout() => {
                return Err((RequestError::Timeout { after: timeout }, None))
            }
            Ok(Err(error)) => {
                return Err((
                    RequestError::Transport {
                        message: error.message().to_owned(),
                    },
                    None,
                ))
            }
            Ok(Ok(response)) => response,
        };

        if response.is_success() {
            return Ok(response.body);
        }

        let retry_after = response.header("retry-after").and_then(parse_retry_after);
        Err((
            RequestError::Status {
                status: response.status,
                body: response.body,
            },
            retry_after,
        ))
    }

    fn should_retry(&self, error: &RequestError) -> bool {
        let retry = &self.config.retry;
        match error {
            RequestError::Timeout { .. } => retry.retry_on_timeout,
            RequestError::Transport { .. } => retry.retry_on_connect,
            RequestError::Status { status, .. } => retry.should_retry_status(*status),
            _ => false,
        }
    }

    fn lock_rng(&self) -> MutexGuard<'_, fastrand::Rng> {
        self.rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `base` + `path` + URL-encoded query; `None` parameters are skipped.
pub fn build_url(
    base: &str,
    path: &str,
    params: &[(String, Option<String>)],
) -> Result<String, RequestError> {
    let mut url = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_owned()
    } else if path.is_empty() {
        base.to_owned()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(RequestError::InvalidUrl {
            message: format!("'{url}' is not an absolute http(s) URL"),
        });
    }

    let query = params
        .iter()
        .filter_map(|(name, value)| {
            value.as_ref().map(|value| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
        })
        .collect::<Vec<_>>()
        .join("&");

    if !query.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&query);
    }

    Ok(url)
}

/// Masks the values of `sensitive` query parameters (case-insensitive).
pub fn redact_url(url: &str, sensitive: &[&str]) -> String {
    let Some((prefix, query)) = url.split_once('?') else {
        return url.to_owned();
    };

    let masked = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((name, _))
                if sensitive
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(name)) =>
            {
                format!("{name}=***")
            }
            _ => pair.to_owned(),
        })
        .collect::<Vec<_>>()
        .join("&");

    format!("{prefix}?{masked}")
}
