//! # Chatguard - resilient chat-completion calls
//!
//! Chatguard posts a prompt to an OpenAI-style chat-completion endpoint and
//! keeps going when the endpoint misbehaves: bounded retries with exponential
//! backoff, a deadline per attempt, error classification that stops on 4xx,
//! and optional template content once every attempt has failed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chatguard::{Client, GenerationOptions, RetryPolicy, TemplateFallback};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chatguard::Error> {
//!     let client = Client::builder()
//!         .endpoint("https://api.deepseek.com/v1/chat/completions")?
//!         .api_key("sk-...")
//!         .model("deepseek-chat")
//!         .timeout(Duration::from_secs(30))
//!         .retry_policy(RetryPolicy::new(3, Duration::from_millis(1000), 2.0)?)
//!         .fallback(TemplateFallback::store_report()?)
//!         .build()?;
//!
//!     let prompt = "Store name: Golden Dumpling\nCategory: dumplings\nPrice range: 35-50";
//!     let report = client
//!         .generate_content(prompt, &GenerationOptions::default())
//!         .await?;
//!
//!     if report.used_fallback {
//!         eprintln!("endpoint unavailable, showing template report");
//!     }
//!     println!("{}", report.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Bounded retries** - `max_attempts` total attempts, delay before attempt *n* is
//!   `initial_delay * multiplier^(n-2)`
//! - **Error classification** - timeouts, network errors, 5xx and bodies without content
//!   are retried; 4xx stops immediately
//! - **Per-attempt deadline** - a timed-out attempt is cancelled and counted as one attempt
//! - **Fallback content** - a template provider guarantees renderable output, flagged with
//!   `used_fallback`
//! - **Model routing** - send specific models to other endpoints with their own keys
//! - **Structured logging** - every attempt, backoff and fallback is a `tracing` event
//!
//! ## Error Handling
//!
//! Without a fallback provider, the final failure is returned:
//!
//! ```no_run
//! use chatguard::{Client, Error, GenerationOptions};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().endpoint("https://api.example.com/v1/chat/completions")?.build()?;
//! match client.generate_content("hello", &GenerationOptions::default()).await {
//!     Ok(generation) => println!("{}", generation.content),
//!     Err(Error::HttpError { status, raw_response, .. }) if status.is_client_error() => {
//!         eprintln!("rejected ({}): {}", status, raw_response);
//!     }
//!     Err(Error::MaxRetriesExceeded { attempts, last_error }) => {
//!         eprintln!("gave up after {} attempts: {}", attempts, last_error);
//!     }
//!     Err(e) => eprintln!("{}", e.summary().message),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Retry Predicates
//!
//! The default predicate retries every 5xx. To treat 501/505 as permanent:
//!
//! ```no_run
//! use chatguard::{Client, retry::RetryOnTransientServerError};
//!
//! # fn example() -> Result<(), chatguard::Error> {
//! let client = Client::builder()
//!     .endpoint("https://api.example.com/v1/chat/completions")?
//!     .retry_predicate(Box::new(RetryOnTransientServerError))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
pub mod fallback;
pub mod inflight;
pub mod metadata;
mod options;
mod response;
pub mod retry;
pub mod routes;
pub mod wire;

pub use client::{Client, ClientBuilder, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT};
pub use error::{Error, ErrorKind, FailureSummary, Result};
pub use fallback::{FallbackFields, FallbackProvider, FieldExtractor, TemplateFallback};
pub use options::GenerationOptions;
pub use response::Generation;
pub use retry::{RetryPolicy, RetryPredicate, Sleeper, TokioSleeper};
pub use routes::ModelRoutes;
