//! Error taxonomy for outbound Crypto Pay API calls.
//!
//! Separates transport failures, structured remote API errors, exhausted
//! retry budgets and externally imposed deadlines so callers and logs can
//! tell a first-attempt failure apart from one that survived every retry.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Result type alias using `CryptoPayError`.
pub type Result<T> = std::result::Result<T, CryptoPayError>;

/// Failure reported by the outbound transport before any HTTP status was
/// observed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The per-request timeout elapsed.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured request timeout in milliseconds
        timeout_ms: u64,
    },

    /// The remote host refused or dropped the connection.
    #[error("connection failed: {message}")]
    Connect {
        /// Underlying connection error
        message: String,
    },

    /// Any other I/O or protocol level failure.
    #[error("network error: {message}")]
    Network {
        /// Underlying network error
        message: String,
    },

    /// The request could not be built or its redirects could not be
    /// followed. Repeating it cannot succeed.
    #[error("invalid request: {message}")]
    Request {
        /// Underlying builder or redirect error
        message: String,
    },
}

impl TransportError {
    /// Whether repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Request { .. })
    }
}

/// Error returned by every outbound SDK operation.
#[derive(Debug, Clone, Error)]
pub enum CryptoPayError {
    /// The transport failed to produce a response.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The API answered with a non-success status.
    #[error("code={status}, name={name}")]
    RemoteApi {
        /// HTTP status or API error code
        status: u16,
        /// Remote error name, e.g. `UNAUTHORIZED`
        name: String,
        /// Optional human readable description
        description: Option<String>,
    },

    /// Every attempt allowed by the retry budget failed.
    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Total number of attempts performed
        attempts: u32,
        /// Last error observed
        #[source]
        source: Box<CryptoPayError>,
    },

    /// The caller's deadline elapsed before the call completed.
    #[error("deadline of {deadline_ms}ms exceeded")]
    Timeout {
        /// Deadline that was exceeded in milliseconds
        deadline_ms: u64,
    },

    /// The API answered but the body could not be interpreted.
    #[error("invalid response (HTTP {status}): {reason}")]
    InvalidResponse {
        /// HTTP status of the response
        status: u16,
        /// Why the body was rejected
        reason: String,
    },

    /// A request argument failed local validation.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// The SDK was configured incorrectly.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Structured error body returned by the API under the `error` key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteErrorBody {
    /// Numeric error code
    pub code: u16,
    /// Error name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

impl CryptoPayError {
    /// Creates a remote API error.
    pub fn remote(status: u16, name: impl Into<String>) -> Self {
        Self::RemoteApi { status, name: name.into(), description: None }
    }

    /// Creates a remote API error from the structured `error` body.
    pub fn from_remote_body(body: RemoteErrorBody) -> Self {
        Self::RemoteApi { status: body.code, name: body.name, description: body.description }
    }

    /// Wraps the last observed error once the retry budget is spent.
    pub fn retries_exhausted(attempts: u32, last: CryptoPayError) -> Self {
        Self::RetriesExhausted { attempts, source: Box::new(last) }
    }

    /// Creates a deadline error.
    pub fn timeout(deadline_ms: u64) -> Self {
        Self::Timeout { deadline_ms }
    }

    /// Creates an invalid response error.
    pub fn invalid_response(status: u16, reason: impl Into<String>) -> Self {
        Self::InvalidResponse { status, reason: reason.into() }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns the HTTP status carried by this error, looking through
    /// exhausted retries.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RemoteApi { status, .. } | Self::InvalidResponse { status, .. } => Some(*status),
            Self::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Returns the error this one ultimately stems from.
    ///
    /// For `RetriesExhausted` this is the last attempt's error; every other
    /// variant returns itself.
    pub fn root_cause(&self) -> &CryptoPayError {
        match self {
            Self::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this error is transient by nature.
    ///
    /// This is a hint for callers; the executor's decision is driven by the
    /// configured retryable status set.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(error) => error.is_retryable(),
            Self::RemoteApi { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::RetriesExhausted { .. }
            | Self::Timeout { .. }
            | Self::InvalidResponse { .. }
            | Self::Validation(_)
            | Self::Configuration(_) => false,
        }
    }
}

/// Category of an SDK error for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport level failure.
    Transport,
    /// Remote API returned an error.
    Remote,
    /// Retry budget exhausted.
    Exhausted,
    /// External deadline exceeded.
    Deadline,
    /// Response body could not be interpreted.
    Response,
    /// Local validation or configuration problem.
    Local,
}

impl From<&CryptoPayError> for ErrorCategory {
    fn from(error: &CryptoPayError) -> Self {
        match error {
            CryptoPayError::Transport(_) => Self::Transport,
            CryptoPayError::RemoteApi { .. } => Self::Remote,
            CryptoPayError::RetriesExhausted { .. } => Self::Exhausted,
            CryptoPayError::Timeout { .. } => Self::Deadline,
            CryptoPayError::InvalidResponse { .. } => Self::Response,
            CryptoPayError::Validation(_) | CryptoPayError::Configuration(_) => Self::Local,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Remote => write!(f, "remote"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Deadline => write!(f, "deadline"),
            Self::Response => write!(f, "response"),
            Self::Local => write!(f, "local"),
        }
    }
}
