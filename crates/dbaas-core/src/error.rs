//! Error types for DBaaS operations.
//!
//! This module provides the error type shared by every DBaaS crate, including
//! HTTP status code mapping, the outcomes of waiting on asynchronous operations,
//! and structured error responses.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::task::Operation;

/// Main error type for DBaaS operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Control plane is unavailable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Failed to decode a response body
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid identifier
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Request timed out at the transport layer
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Credentials were rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request with details
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Conflict error
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limit hit
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid endpoint
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Poll policy rejected before any status query was issued
    #[error("Invalid poll policy: {0}")]
    InvalidPollPolicy(String),

    /// The task was still running when the tracker's deadline left no room
    /// for another query.
    ///
    /// Raised as soon as the next query could not start before the deadline,
    /// so `elapsed` can be up to one poll interval short of the timeout.
    #[error("Deadline exceeded after {elapsed:?} waiting for task {task_id}")]
    DeadlineExceeded {
        /// Task being tracked
        task_id: String,
        /// Time spent in the poll loop
        elapsed: Duration,
        /// Last snapshot observed before giving up
        last: Option<Box<Operation>>,
    },

    /// The tracker used up its attempt budget while the task was still running.
    #[error("Task {task_id} still running after {attempts} status queries")]
    AttemptsExhausted {
        /// Task being tracked
        task_id: String,
        /// Number of status queries issued
        attempts: u32,
        /// Last snapshot observed before giving up
        last: Option<Box<Operation>>,
    },

    /// The caller cancelled the wait.
    #[error("Cancelled while waiting for task {task_id}")]
    Cancelled {
        /// Task being tracked
        task_id: String,
        /// Last snapshot observed before cancellation
        last: Option<Box<Operation>>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Specialized result type for DBaaS operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error response for serialization.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
    /// Optional request ID for tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error detail structure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorDetail {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::InvalidId(_) => "INVALID_ID",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::HttpError(_) => "HTTP_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::InvalidPollPolicy(_) => "INVALID_POLL_POLICY",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::AttemptsExhausted { .. } => "ATTEMPTS_EXHAUSTED",
            Self::Cancelled { .. } => "CANCELLED",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Converts the error into an `ErrorResponse`.
    #[must_use]
    pub fn into_error_response(self) -> ErrorResponse {
        self.into_error_response_with_id(None)
    }

    /// Converts the error into an `ErrorResponse` with a request ID.
    #[must_use]
    pub fn into_error_response_with_id(self, request_id: Option<String>) -> ErrorResponse {
        let details = self
            .last_observed()
            .and_then(|op| serde_json::to_value(op).ok());

        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details,
            },
            request_id,
        }
    }

    /// Returns true if the error came from talking to the control plane
    /// (network, HTTP status or decoding) rather than from local policy.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable(_)
                | Self::ParseError(_)
                | Self::HttpError(_)
                | Self::Timeout(_)
                | Self::Unauthorized(_)
                | Self::NotFound(_)
                | Self::BadRequest(_)
                | Self::Conflict(_)
                | Self::RateLimited(_)
                | Self::InvalidEndpoint(_)
        )
    }

    /// Returns true if repeating the HTTP request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable(_) | Self::Timeout(_) | Self::RateLimited(_)
        )
    }

    /// Returns true if the tracker stopped waiting while the remote task was
    /// still running (deadline, attempt cap or cancellation).
    #[must_use]
    pub const fn is_still_running(&self) -> bool {
        matches!(
            self,
            Self::DeadlineExceeded { .. } | Self::AttemptsExhausted { .. } | Self::Cancelled { .. }
        )
    }

    /// Last task snapshot observed before the tracker stopped waiting.
    #[must_use]
    pub fn last_observed(&self) -> Option<&Operation> {
        match self {
            Self::DeadlineExceeded { last, .. }
            | Self::AttemptsExhausted { last, .. }
            | Self::Cancelled { last, .. } => last.as_deref(),
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::ServiceUnavailable(err.to_string())
        } else if err.is_decode() {
            Self::ParseError(err.to_string())
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationError(err.to_string())
    }
}
