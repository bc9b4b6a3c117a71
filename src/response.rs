//! Result of a `generate_content` call.
//!
//! A [`Generation`] carries the content to render together with where it came
//! from: the remote model, or the fallback provider after every attempt
//! failed.

use crate::error::FailureSummary;
use http::StatusCode;
use std::time::Duration;

/// Content produced by [`Client::generate_content`].
///
/// # Examples
///
/// ```no_run
/// use chatguard::{Client, GenerationOptions, TemplateFallback};
///
/// # async fn example() -> Result<(), chatguard::Error> {
/// let client = Client::builder()
///     .endpoint("https://api.example.com/v1/chat/completions")?
///     .api_key("sk-test")
///     .fallback(TemplateFallback::store_report()?)
///     .build()?;
///
/// let generation = client
///     .generate_content("Store name: Noodle House", &GenerationOptions::default())
///     .await?;
///
/// if generation.used_fallback {
///     eprintln!("showing template content: {:?}", generation.fallback_reason);
/// }
/// println!("{}", generation.content);
/// # Ok(())
/// # }
/// ```
///
/// [`Client::generate_content`]: crate::Client::generate_content
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// The text or HTML to render.
    pub content: String,

    /// `true` when `content` came from the fallback provider.
    pub used_fallback: bool,

    /// Why the fallback was used. `None` for remote content.
    pub fallback_reason: Option<FailureSummary>,

    /// Model named in the request body.
    pub model: String,

    /// Status of the successful response. `None` for fallback content.
    pub status: Option<StatusCode>,

    /// Number of HTTP attempts made. Zero when the request was rejected
    /// before sending.
    pub attempts: usize,

    /// Time from the first attempt until the content was available,
    /// including backoff waits.
    pub latency: Duration,
}

impl Generation {
    pub(crate) fn remote(
        content: String,
        model: String,
        status: StatusCode,
        attempts: usize,
        latency: Duration,
    ) -> Self {
        Self {
            content,
            used_fallback: false,
            fallback_reason: None,
            model,
            status: Some(status),
            attempts,
            latency,
        }
    }

    pub(crate) fn fallback(
        content: String,
        model: String,
        reason: FailureSummary,
        attempts: usize,
        latency: Duration,
    ) -> Self {
        Self {
            content,
            used_fallback: true,
            fallback_reason: Some(reason),
            model,
            status: None,
            attempts,
            latency,
        }
    }

    /// Returns `true` if more than one attempt was needed.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }
}

impl AsRef<str> for Generation {
    fn as_ref(&self) -> &str {
        &self.content
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.content)
    }
}
