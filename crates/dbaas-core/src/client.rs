//! HTTP transport and retry logic.
//!
//! [`ServiceClient`] is the one place that talks HTTP: it joins paths onto the
//! API base URL, attaches the bearer token, retries transient failures of
//! idempotent requests with exponential backoff, and maps error statuses
//! through a caller-supplied function.

use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};

/// Default timeout for control-plane requests (seconds)
pub const DBAAS_DEFAULT_TIMEOUT: u64 = 30;

/// Default connect timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

/// Seconds an unused pooled connection is kept open
pub const POOL_IDLE_SECS: u64 = 90;

/// Idle connections kept per control-plane host
pub const POOL_IDLE_PER_HOST: usize = 10;

/// Transport retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first transport retry (milliseconds)
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 500;

/// Upper bound for a single backoff delay (milliseconds)
pub const MAX_RETRY_INTERVAL_MS: u64 = 5000;

/// Transport retry schedule.
///
/// Covers a single HTTP exchange. A task that keeps reporting `RUNNING` is
/// the business of [`crate::tracker::OperationTracker`] and never retried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before retry #1
    pub initial_delay: Duration,

    /// Ceiling applied after growth
    pub max_delay: Duration,

    /// Growth factor between consecutive delays; 1 keeps them constant
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Three retries starting at 500 ms, doubling up to 5 s.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            max_delay: Duration::from_millis(MAX_RETRY_INTERVAL_MS),
            multiplier: 2,
        }
    }

    /// Single attempt, failures surface immediately.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::fixed(0, Duration::ZERO)
    }

    /// `retries` retries spaced by a constant `interval`.
    #[must_use]
    pub const fn fixed(retries: u32, interval: Duration) -> Self {
        Self {
            max_retries: retries,
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1,
        }
    }

    /// Set the number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Cap every delay at `delay`.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait before retry number `retry` (1-based); zero for 0.
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let Some(exponent) = retry.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection-level settings of the underlying `reqwest` client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Whole-request timeout
    pub timeout: Duration,

    /// Transport retry schedule
    pub retry_policy: RetryPolicy,

    /// How long an idle pooled connection survives
    pub idle_timeout: Duration,

    /// Idle connections kept per host
    pub idle_per_host: usize,

    /// Log each attempt at `info` instead of `debug`
    pub log_requests: bool,

    /// Negotiate gzip response bodies
    pub gzip: bool,
}

impl ClientConfig {
    /// Defaults: 30 s timeout, [`RetryPolicy::new`], gzip on, requests logged.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DBAAS_DEFAULT_TIMEOUT),
            retry_policy: RetryPolicy::new(),
            idle_timeout: Duration::from_secs(POOL_IDLE_SECS),
            idle_per_host: POOL_IDLE_PER_HOST,
            log_requests: true,
            gzip: true,
        }
    }

    /// Set the whole-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the transport retry schedule.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Tune the connection pool.
    #[must_use]
    pub const fn with_pool(mut self, idle_timeout: Duration, idle_per_host: usize) -> Self {
        self.idle_timeout = idle_timeout;
        self.idle_per_host = idle_per_host;
        self
    }

    /// Log each attempt at `info` (`true`) or `debug` (`false`).
    #[must_use]
    pub const fn with_request_logging(mut self, enabled: bool) -> Self {
        self.log_requests = enabled;
        self
    }

    /// Toggle gzip negotiation.
    #[must_use]
    pub const fn with_gzip(mut self, enabled: bool) -> Self {
        self.gzip = enabled;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`ServiceClient`].
#[derive(Debug, Clone)]
pub struct ServiceClientBuilder {
    service: &'static str,
    base_url: Url,
    http_config: ClientConfig,
    user_agent: Option<String>,
    token: Option<SecretString>,
    tls_verify: bool,
    tls_ca_cert: Option<PathBuf>,
}

impl ServiceClientBuilder {
    /// Create a builder for `service` rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the URL cannot be parsed or
    /// cannot carry a path.
    pub fn new(service: &'static str, base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.as_ref())?;

        Ok(Self {
            service,
            base_url,
            http_config: ClientConfig::new().with_timeout(timeout),
            user_agent: None,
            token: None,
            tls_verify: true,
            tls_ca_cert: None,
        })
    }

    /// Set the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.http_config.retry_policy = retry;
        self
    }

    /// Override the HTTP client configuration.
    #[must_use]
    pub fn with_http_config(mut self, config: ClientConfig) -> Self {
        self.http_config = config;
        self
    }

    /// Send `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<SecretString>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set whether to verify TLS certificates.
    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Trust an additional PEM CA certificate.
    #[must_use]
    pub fn with_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the CA certificate cannot be loaded or
    /// the HTTP client cannot be constructed.
    pub fn build(self) -> Result<ServiceClient> {
        let service = self.service;
        let config = self.http_config;

        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT))
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.idle_per_host)
            .gzip(config.gzip);

        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }

        if !self.tls_verify {
            warn!(service, "TLS verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ca_cert) = &self.tls_ca_cert {
            debug!(service, "loading CA certificate from {}", ca_cert.display());
            let bytes = std::fs::read(ca_cert).map_err(|err| {
                Error::ConfigError(format!(
                    "Failed to read CA certificate {}: {err}",
                    ca_cert.display()
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&bytes)
                .map_err(|err| Error::ConfigError(format!("Invalid CA certificate: {err}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder.build().map_err(|err| {
            Error::ConfigError(format!("Failed to build {service} HTTP client: {err}"))
        })?;

        Ok(ServiceClient {
            service,
            http,
            base_url: self.base_url,
            token: self.token,
            retry_policy: config.retry_policy,
            log_requests: config.log_requests,
        })
    }
}

/// Authenticated HTTP client for one API.
#[derive(Clone)]
pub struct ServiceClient {
    service: &'static str,
    http: Client,
    base_url: Url,
    token: Option<SecretString>,
    retry_policy: RetryPolicy,
    log_requests: bool,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service", &self.service)
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.token.is_some())
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    /// Return the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the path cannot be joined.
    pub fn build_url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|err| {
            Error::InvalidEndpoint(format!("Invalid {} path `{path}`: {err}", self.service))
        })
    }

    /// Send a request, retrying transient failures of idempotent methods.
    ///
    /// `customize` is applied to every attempt (headers, body). Non-2xx
    /// responses are turned into errors with `map_status`; retryable ones
    /// (see [`Error::is_retryable`]) are retried for idempotent methods only,
    /// so a `POST` that submits a task is never sent twice.
    ///
    /// # Errors
    ///
    /// Returns the mapped error of the last attempt.
    pub async fn execute_with_retry<F, M>(
        &self,
        method: Method,
        path: &str,
        params: &[(&'static str, String)],
        customize: F,
        map_status: M,
    ) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
        M: Fn(StatusCode, String) -> Error,
    {
        let url = self.build_url(path)?;
        let retries = if method.is_idempotent() {
            self.retry_policy.max_retries
        } else {
            0
        };
        let mut attempt: u32 = 0;

        loop {
            let mut request = self.http.request(method.clone(), url.clone());
            if !params.is_empty() {
                request = request.query(params);
            }
            if let Some(token) = &self.token {
                request = request.bearer_auth(token.expose_secret());
            }
            request = customize(request);

            if self.log_requests {
                info!(service = self.service, %method, path = %path, attempt, "sending request");
            } else {
                debug!(service = self.service, %method, path = %path, attempt, "sending request");
            }

            let error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let message = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    map_status(status, message)
                }
                Err(err) => Error::from(err),
            };

            if !error.is_retryable() || attempt >= retries {
                return Err(error);
            }

            attempt += 1;
            let delay = self.retry_policy.delay_for_attempt(attempt);
            warn!(service = self.service, path = %path, attempt, ?delay, error = %error, "retrying request");
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }
}

fn normalize_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    if url.cannot_be_a_base() {
        return Err(Error::InvalidEndpoint(format!(
            "`{raw}` cannot be used as a base URL"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn map_status(status: StatusCode, text: String) -> Error {
        match status {
            StatusCode::NOT_FOUND => Error::NotFound(text),
            StatusCode::SERVICE_UNAVAILABLE => Error::ServiceUnavailable(text),
            _ => Error::HttpError(format!("{status}: {text}")),
        }
    }

    fn test_client(server: &MockServer, retry: RetryPolicy) -> ServiceClient {
        ServiceClientBuilder::new("dbaas", format!("{}/v1", server.uri()), Duration::from_secs(5))
            .unwrap()
            .with_retry_policy(retry)
            .with_token("secret-token")
            .build()
            .unwrap()
    }

    #[test]
    fn default_schedule_doubles_until_capped() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..=5).map(|n| policy.delay_for_attempt(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(MAX_RETRY_INTERVAL_MS),
            ]
        );
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn fixed_and_disabled_schedules() {
        let fixed = RetryPolicy::fixed(4, Duration::from_secs(2));
        assert_eq!(fixed.delay_for_attempt(1), fixed.delay_for_attempt(4));

        let none = RetryPolicy::no_retry();
        assert_eq!(none.max_retries, 0);
        assert_eq!(none.delay_for_attempt(1), Duration::ZERO);

        let tripled = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplier(3)
            .with_max_delay(Duration::from_secs(60));
        assert_eq!(tripled.delay_for_attempt(3), Duration::from_millis(900));
    }

    #[test]
    fn client_config_overrides() {
        let config = ClientConfig::default()
            .with_timeout(Duration::from_secs(120))
            .with_pool(Duration::from_secs(30), 2)
            .with_request_logging(false)
            .with_gzip(false);

        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!((config.idle_timeout, config.idle_per_host), (Duration::from_secs(30), 2));
        assert!(!config.log_requests && !config.gzip);
        assert_eq!(config.retry_policy, RetryPolicy::new());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = ServiceClientBuilder::new("dbaas", "https://api.example.com/v1", Duration::from_secs(1))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(client.base_url().as_str(), "https://api.example.com/v1/");
        assert_eq!(
            client.build_url("clusters/c1").unwrap().as_str(),
            "https://api.example.com/v1/clusters/c1"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = ServiceClientBuilder::new("dbaas", "not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoint(_)));

        let err = ServiceClientBuilder::new("dbaas", "mailto:ops@example.com", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoint(_)));
    }

    #[test]
    fn test_debug_hides_token() {
        let client = ServiceClientBuilder::new("dbaas", "https://api.example.com", Duration::from_secs(1))
            .unwrap()
            .with_token("super-secret")
            .build()
            .unwrap();
        let rendered = format!("{client:?}");
        assert!(rendered.contains("authenticated: true"));
        assert!(!rendered.contains("super-secret"));
    }

    #[tokio::test]
    async fn sends_bearer_token_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/clusters"))
            .and(header("authorization", "Bearer secret-token"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, RetryPolicy::no_retry());
        let response = client
            .execute_with_retry(Method::GET, "clusters", &[("limit", "5".to_string())], |r| r, map_status)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn retries_idempotent_request_on_service_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/clusters/c1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/clusters/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let retry = RetryPolicy::fixed(3, Duration::from_millis(1));
        let client = test_client(&server, retry);
        let response = client
            .execute_with_retry(Method::GET, "clusters/c1", &[], |r| r, map_status)
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn never_retries_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/clusters/c1/restore"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(1)
            .mount(&server)
            .await;

        let retry = RetryPolicy::fixed(3, Duration::from_millis(1));
        let client = test_client(&server, retry);
        let err = client
            .execute_with_retry(Method::POST, "clusters/c1/restore", &[], |r| r, map_status)
            .await
            .unwrap_err();
        assert_eq!(err, Error::ServiceUnavailable("busy".to_string()));
    }

    #[tokio::test]
    async fn does_not_retry_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/clusters/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such cluster"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, RetryPolicy::fixed(3, Duration::from_millis(1)));
        let err = client
            .execute_with_retry(Method::GET, "clusters/missing", &[], |r| r, map_status)
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound("no such cluster".to_string()));
    }
}
