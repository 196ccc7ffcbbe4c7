//! Configuration structures for DBaaS clients.
//!
//! [`DbaasClientConfig`] describes how to reach the control plane and how long
//! to wait on asynchronous operations. It can be built in code, deserialized,
//! or loaded from `DBAAS_*` environment variables.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::client::{RetryPolicy, DEFAULT_RETRY_INTERVAL_MS, MAX_RETRY_INTERVAL_MS};
use crate::tracker::{PollPolicy, DEFAULT_POLL_INTERVAL_SECS};
use crate::Error;

/// Environment variable holding the API base URL.
pub const ENV_API_URL: &str = "DBAAS_API_URL";
/// Environment variable holding the API token.
pub const ENV_API_TOKEN: &str = "DBAAS_API_TOKEN";
/// Environment variable toggling TLS verification.
pub const ENV_TLS_VERIFY: &str = "DBAAS_TLS_VERIFY";
/// Environment variable with a CA certificate path.
pub const ENV_TLS_CA_CERT: &str = "DBAAS_TLS_CA_CERT";
/// Environment variable with the request timeout in seconds.
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "DBAAS_REQUEST_TIMEOUT_SECS";
/// Environment variable with the transport retry count.
pub const ENV_MAX_RETRIES: &str = "DBAAS_MAX_RETRIES";
/// Environment variable with the transport retry interval in milliseconds.
pub const ENV_RETRY_INTERVAL_MS: &str = "DBAAS_RETRY_INTERVAL_MS";
/// Environment variable with the task poll interval in seconds.
pub const ENV_POLL_INTERVAL_SECS: &str = "DBAAS_POLL_INTERVAL_SECS";
/// Environment variable with the task wait deadline in seconds.
pub const ENV_POLL_TIMEOUT_SECS: &str = "DBAAS_POLL_TIMEOUT_SECS";
/// Environment variable with the maximum number of task status queries.
pub const ENV_POLL_MAX_ATTEMPTS: &str = "DBAAS_POLL_MAX_ATTEMPTS";

/// Configuration for a DBaaS client instance.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DbaasClientConfig {
    /// Control-plane API base URL (e.g. `https://dbaas.example.com/api/v1`)
    #[validate(url)]
    pub api_url: String,

    /// Bearer token; never serialized
    #[serde(skip)]
    pub api_token: Option<SecretString>,

    /// Whether to verify TLS certificates
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,

    /// Optional path to custom CA certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Request timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum number of transport retry attempts
    #[validate(range(min = 0, max = 10))]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first transport retry, in milliseconds
    #[validate(range(min = 1, max = 60000))]
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Task polling settings
    #[validate(nested)]
    #[serde(default)]
    pub poll: PollConfig,
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

impl DbaasClientConfig {
    /// Create a new client configuration with required parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or validation fails.
    pub fn new(api_url: impl Into<String>) -> Result<Self, Error> {
        let config = Self {
            api_url: api_url.into(),
            ..Self::default()
        };

        config
            .validate()
            .map_err(|e| Error::ConfigError(format!("Invalid configuration: {e}")))?;

        Ok(config)
    }

    /// Load the configuration from `DBAAS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `DBAAS_API_URL` is missing, a value cannot be
    /// parsed, or validation fails.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup(ENV_API_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::ConfigError(format!("{ENV_API_URL} is not set")))?;

        let mut config = Self {
            api_url,
            ..Self::default()
        };

        config.api_token = lookup(ENV_API_TOKEN)
            .filter(|v| !v.is_empty())
            .map(SecretString::from);
        config.tls_ca_cert = lookup(ENV_TLS_CA_CERT).map(PathBuf::from);

        if let Some(v) = parse_var(&lookup, ENV_TLS_VERIFY)? {
            config.tls_verify = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_REQUEST_TIMEOUT_SECS)? {
            config.request_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_RETRIES)? {
            config.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_RETRY_INTERVAL_MS)? {
            config.retry_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_POLL_INTERVAL_SECS)? {
            config.poll.interval_secs = v;
        }
        config.poll.timeout_secs = parse_var(&lookup, ENV_POLL_TIMEOUT_SECS)?;
        config.poll.max_attempts = parse_var(&lookup, ENV_POLL_MAX_ATTEMPTS)?;

        config
            .validate()
            .map_err(|e| Error::ConfigError(format!("Invalid configuration: {e}")))?;

        Ok(config)
    }

    /// Set the API token.
    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<SecretString>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Set whether to verify TLS certificates.
    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Set custom CA certificate path.
    #[must_use]
    pub fn with_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Set request timeout in seconds.
    #[must_use]
    pub const fn with_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout_secs = seconds;
        self
    }

    /// Set maximum transport retry attempts.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set task polling settings.
    #[must_use]
    pub const fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Transport retry policy derived from `max_retries` and `retry_interval_ms`.
    ///
    /// The backoff cap never drops below the configured interval.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        let cap_ms = if self.retry_interval_ms > MAX_RETRY_INTERVAL_MS {
            self.retry_interval_ms
        } else {
            MAX_RETRY_INTERVAL_MS
        };
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.retry_interval_ms))
            .with_max_delay(Duration::from_millis(cap_ms))
    }
}

impl Default for DbaasClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/api/v1".to_string(),
            api_token: None,
            tls_verify: default_tls_verify(),
            tls_ca_cert: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
            poll: PollConfig::default(),
        }
    }
}

/// Task polling settings, in serializable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PollConfig {
    /// Seconds between two task status queries
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,

    /// Overall wait deadline in seconds
    #[validate(range(min = 1))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Maximum number of status queries
    #[validate(range(min = 1))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

const fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl PollConfig {
    /// Create polling settings with the 30 second default interval.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            timeout_secs: None,
            max_attempts: None,
        }
    }

    /// Set the poll interval in seconds.
    #[must_use]
    pub const fn with_interval(mut self, seconds: u64) -> Self {
        self.interval_secs = seconds;
        self
    }

    /// Set the wait deadline in seconds.
    #[must_use]
    pub const fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = Some(seconds);
        self
    }

    /// Set the maximum number of status queries.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Convert into a [`PollPolicy`].
    #[must_use]
    pub fn to_policy(&self) -> PollPolicy {
        let mut policy = PollPolicy::new().with_interval(Duration::from_secs(self.interval_secs));
        if let Some(timeout) = self.timeout_secs {
            policy = policy.with_timeout(Duration::from_secs(timeout));
        }
        if let Some(attempts) = self.max_attempts {
            policy = policy.with_max_attempts(attempts);
        }
        policy
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::ConfigError(format!("Invalid value for {key}: {e}"))),
        _ => Ok(None),
    }
}
