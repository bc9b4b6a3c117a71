//! Per-call request description.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use url::Url;

/// Everything needed to send one chat-completion request.
///
/// A `RequestSpec` is built once per [`generate_content`] call and then only
/// borrowed by each attempt, so every retry sends exactly the same request.
///
/// [`generate_content`]: crate::Client::generate_content
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// The URL the request is posted to.
    pub endpoint: Url,

    /// Headers for this request, including `Authorization`.
    pub headers: HeaderMap,

    /// The JSON request body.
    pub body: serde_json::Value,

    /// Deadline for a single attempt.
    pub timeout: Duration,
}

impl RequestSpec {
    /// Creates a new `RequestSpec` with no headers.
    pub fn new(endpoint: Url, body: serde_json::Value, timeout: Duration) -> Self {
        Self {
            endpoint,
            headers: HeaderMap::new(),
            body,
            timeout,
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| crate::Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| crate::Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds an `Authorization: Bearer <token>` header.
    ///
    /// A leading `Bearer` scheme (any case) on `token` is dropped first.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is left after the scheme is removed.
    pub fn with_bearer(self, token: &str) -> Result<Self, crate::Error> {
        let token = bearer_token(token)?;
        self.with_header("authorization", format!("Bearer {}", token))
    }

    /// Serialized body size in bytes.
    pub fn body_len(&self) -> usize {
        self.body.to_string().len()
    }
}

/// Returns `raw` without surrounding whitespace or a leading `Bearer` scheme.
pub(crate) fn bearer_token(raw: &str) -> Result<&str, crate::Error> {
    let raw = raw.trim();
    let token = match raw.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer") => {
            let rest = &raw[6..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                rest.trim_start()
            } else {
                raw
            }
        }
        _ => raw,
    };
    if token.is_empty() {
        return Err(crate::Error::Configuration(
            "API key is empty".to_string(),
        ));
    }
    Ok(token)
}
