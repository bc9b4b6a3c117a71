//! Error types for chat-completion calls.
//!
//! Every failure an attempt can produce is a variant of [`Error`]. The retry
//! loop only needs the coarse [`ErrorKind`] to decide what happens next, and
//! callers that just want to show something to a user can take a
//! [`FailureSummary`].

use http::{HeaderMap, StatusCode};
use serde::Serialize;

/// The main error type for chat-completion calls.
///
/// # Examples
///
/// ```no_run
/// use chatguard::{Client, Error, GenerationOptions};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .endpoint("https://api.example.com/v1/chat/completions")?
///     .api_key("sk-test")
///     .model("gpt-4o-mini")
///     .build()?;
///
/// match client.generate_content("Summarize this store", &GenerationOptions::default()).await {
///     Ok(generation) => println!("{}", generation.content),
///     Err(Error::HttpError { status, raw_response, .. }) => {
///         eprintln!("HTTP error {}: {}", status, raw_response);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error occurred (connection refused, DNS lookup failed, etc.).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The attempt did not complete before its deadline and was cancelled.
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a success status, but the body did not carry
    /// `choices[0].message.content`.
    #[error("Malformed response (status {status}): {reason}")]
    MalformedResponse {
        /// The raw response body
        raw_response: String,
        /// What was missing or unparseable
        reason: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The server returned a non-2xx HTTP status code.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// Invalid configuration or call options were provided.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The serialized request body is larger than the configured limit.
    #[error("Request body of {size} bytes exceeds the {limit} byte limit")]
    RequestTooLarge {
        /// Serialized body size in bytes
        size: usize,
        /// Configured maximum
        limit: usize,
    },

    /// All attempts were used up on retryable failures.
    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// The number of attempts made
        attempts: usize,
        /// The last error encountered
        last_error: Box<Error>,
    },

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Deadline exceeded.
    Timeout,
    /// Transport-level failure.
    Network,
    /// 5xx status.
    Server,
    /// 4xx status.
    Client,
    /// Success status without usable content.
    MalformedResponse,
    /// Problems detected before anything was sent.
    Local,
    /// Attempts exhausted.
    Exhausted,
}

impl Error {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(e) if e.is_timeout() => ErrorKind::Timeout,
            Error::Network(_) => ErrorKind::Network,
            Error::Timeout => ErrorKind::Timeout,
            Error::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Error::HttpError { status, .. } if status.is_client_error() => ErrorKind::Client,
            // Anything that is neither 2xx nor 4xx counts as a server failure.
            Error::HttpError { .. } => ErrorKind::Server,
            Error::Configuration(_)
            | Error::RequestTooLarge { .. }
            | Error::SerializationFailed(_)
            | Error::InvalidUrl(_) => ErrorKind::Local,
            Error::MaxRetriesExceeded { .. } => ErrorKind::Exhausted,
        }
    }

    /// Returns `true` if this error is potentially retryable.
    ///
    /// Network errors, timeouts, malformed bodies and 5xx HTTP errors are
    /// retryable. 4xx errors and local errors are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatguard::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::SERVICE_UNAVAILABLE,
    ///     raw_response: "busy".to_string(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(err.is_retryable());
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::UNAUTHORIZED,
    ///     raw_response: "bad key".to_string(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout
                | ErrorKind::Network
                | ErrorKind::Server
                | ErrorKind::MalformedResponse
        )
    }

    /// Returns the HTTP status code if this error has one.
    ///
    /// For `MaxRetriesExceeded` this is the status of the last error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::MalformedResponse { status, .. } => Some(*status),
            Error::Network(e) => e.status(),
            Error::MaxRetriesExceeded { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    /// Returns `true` iff the status code is in `[400, 500)`.
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| s.is_client_error())
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::MalformedResponse { raw_response, .. } => Some(raw_response),
            Error::MaxRetriesExceeded { last_error, .. } => last_error.raw_response(),
            _ => None,
        }
    }

    /// Returns the error that ended the last attempt, looking through
    /// `MaxRetriesExceeded`.
    pub fn root(&self) -> &Error {
        match self {
            Error::MaxRetriesExceeded { last_error, .. } => last_error.root(),
            other => other,
        }
    }

    /// Flattens this error into a plain [`FailureSummary`].
    ///
    /// `kind` describes the root cause, so an exhausted run of timeouts
    /// reports [`ErrorKind::Timeout`].
    pub fn summary(&self) -> FailureSummary {
        FailureSummary {
            message: self.to_string(),
            status_code: self.status().map(|s| s.as_u16()),
            is_client_error: self.is_client_error(),
            kind: self.root().kind(),
        }
    }
}

/// A display-ready description of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    /// Human-readable message.
    pub message: String,
    /// HTTP status of the failing response, if any.
    pub status_code: Option<u16>,
    /// `true` iff `status_code` is in `[400, 500)`.
    pub is_client_error: bool,
    /// Classification of the underlying error.
    pub kind: ErrorKind,
}

/// A specialized `Result` type for chat-completion calls.
pub type Result<T> = std::result::Result<T, Error>;
