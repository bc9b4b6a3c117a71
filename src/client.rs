//! Chat-completion client with retry logic and fallback content.
//!
//! The [`Client`] type is the main entry point. Use [`ClientBuilder`] to
//! configure and create clients.

use crate::{
    fallback::{FallbackFields, FallbackProvider},
    inflight::{InFlightRegistry, RequestFingerprint},
    metadata::{bearer_token, RequestSpec},
    options::validate_temperature,
    retry::{AttemptOutcome, RetryOnRetryable, RetryPolicy, RetryPredicate, Sleeper, TokioSleeper},
    routes::ModelRoutes,
    wire::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage},
    Error, Generation, GenerationOptions, Result,
};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Persona sent as the system message when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a senior restaurant and retail operations \
consultant. Answer in well-structured HTML that can be inserted directly into a report.";

/// Model used when neither the builder nor the call names one.
pub const DEFAULT_MODEL: &str = "deepseek-chat";

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 4000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A chat-completion client with bounded retries, per-attempt timeouts and
/// optional fallback content.
///
/// The client is immutable once built and cheap to clone. To change its
/// configuration, derive a new client with [`Client::to_builder`].
///
/// # Examples
///
/// ```no_run
/// use chatguard::{Client, GenerationOptions, RetryPolicy, TemplateFallback};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), chatguard::Error> {
/// let client = Client::builder()
///     .endpoint("https://api.deepseek.com/v1/chat/completions")?
///     .api_key("sk-...")
///     .model("deepseek-chat")
///     .timeout(Duration::from_secs(30))
///     .retry_policy(RetryPolicy::new(3, Duration::from_millis(1000), 2.0)?)
///     .fallback(TemplateFallback::store_report()?)
///     .build()?;
///
/// let report = client
///     .generate_content(
///         "Store name: Noodle House\nCategory: noodles",
///         &GenerationOptions::default().temperature(0.3),
///     )
///     .await?;
/// println!("{}", report.content);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    default_headers: HeaderMap,
    retry_policy: RetryPolicy,
    retry_predicate: Arc<dyn RetryPredicate>,
    fallback: Option<Arc<dyn FallbackProvider>>,
    sleeper: Arc<dyn Sleeper>,
    routes: ModelRoutes,
    max_request_bytes: Option<usize>,
    inflight: Option<InFlightRegistry>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        f.debug_struct("Client")
            .field("endpoint", &inner.endpoint.as_str())
            .field("api_key", &inner.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &inner.model)
            .field("temperature", &inner.temperature)
            .field("max_tokens", &inner.max_tokens)
            .field("timeout", &inner.timeout)
            .field("retry_policy", &inner.retry_policy)
            .field("has_fallback", &inner.fallback.is_some())
            .field("routes", &inner.routes)
            .field("max_request_bytes", &inner.max_request_bytes)
            .finish()
    }
}

/// How a run of attempts ended without content.
struct Exhausted {
    error: Error,
    attempts: usize,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Returns a builder pre-filled with this client's configuration.
    ///
    /// The connection pool is shared with the new client.
    pub fn to_builder(&self) -> ClientBuilder {
        let inner = &self.inner;
        ClientBuilder {
            http_client: Some(inner.http_client.clone()),
            endpoint: Some(inner.endpoint.clone()),
            api_key: inner.api_key.clone(),
            model: inner.model.clone(),
            system_prompt: inner.system_prompt.clone(),
            temperature: inner.temperature,
            max_tokens: inner.max_tokens,
            timeout: inner.timeout,
            default_headers: inner.default_headers.clone(),
            retry_policy: inner.retry_policy.clone(),
            retry_predicate: Some(inner.retry_predicate.clone()),
            fallback: inner.fallback.clone(),
            sleeper: Some(inner.sleeper.clone()),
            routes: inner.routes.clone(),
            max_request_bytes: inner.max_request_bytes,
            serialize_identical_requests: inner.inflight.is_some(),
        }
    }

    /// Sends `prompt` to the chat-completion endpoint and returns the first
    /// choice's content.
    ///
    /// Retryable failures (timeouts, network errors, 5xx, bodies without
    /// content) are retried according to the client's [`RetryPolicy`]; a 4xx
    /// stops immediately. When every attempt has failed and a fallback
    /// provider is configured, its content is returned with
    /// [`Generation::used_fallback`] set. The fallback fields are extracted
    /// from `prompt`.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] for an empty prompt or out-of-range
    ///   options, even when a fallback is configured.
    /// - Without a fallback, the error that ended the last attempt, wrapped
    ///   in [`Error::MaxRetriesExceeded`] when it was retryable.
    pub async fn generate_content(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation> {
        self.generate(prompt, options, None).await
    }

    /// Like [`Client::generate_content`], but hands `fields` to the fallback
    /// provider as-is instead of extracting them from the prompt.
    pub async fn generate_content_with_fields(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        fields: &FallbackFields,
    ) -> Result<Generation> {
        self.generate(prompt, options, Some(fields)).await
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        fields: Option<&FallbackFields>,
    ) -> Result<Generation> {
        options.validate()?;
        if prompt.trim().is_empty() {
            return Err(Error::Configuration("prompt must not be empty".to_string()));
        }

        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.inner.model.clone());
        let spec = self.request_spec(prompt, options, &model)?;
        let start_time = Instant::now();

        if let Some(limit) = self.inner.max_request_bytes {
            let size = spec.body_len();
            if size > limit {
                tracing::error!(size = size, limit = limit, "Request body too large");
                let exhausted = Exhausted {
                    error: Error::RequestTooLarge { size, limit },
                    attempts: 0,
                };
                return self
                    .fall_back(exhausted, prompt, fields, model, start_time)
                    .await;
            }
        }

        let _guard = match &self.inner.inflight {
            Some(registry) => Some(registry.acquire(RequestFingerprint::of(&spec)).await),
            None => None,
        };

        match self.send_with_retry(&spec).await {
            Ok((content, status, attempts)) => Ok(Generation::remote(
                content,
                model,
                status,
                attempts,
                start_time.elapsed(),
            )),
            Err(exhausted) => {
                self.fall_back(exhausted, prompt, fields, model, start_time)
                    .await
            }
        }
    }

    /// Builds the request for one call.
    fn request_spec(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        model: &str,
    ) -> Result<RequestSpec> {
        let inner = &self.inner;
        let route = inner.routes.get(model);
        let endpoint = route
            .map(|r| r.endpoint.clone())
            .unwrap_or_else(|| inner.endpoint.clone());
        // The client's own key wins over a route's default key.
        let api_key = inner
            .api_key
            .as_deref()
            .or_else(|| route.and_then(|r| r.api_key.as_deref()));

        let body = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage::system(inner.system_prompt.as_str()),
                ChatMessage::user(prompt),
            ],
            temperature: options.temperature.unwrap_or(inner.temperature),
            max_tokens: options.max_tokens.unwrap_or(inner.max_tokens),
            stream: false,
        };
        let body =
            serde_json::to_value(&body).map_err(|e| Error::SerializationFailed(e.to_string()))?;

        let mut spec = RequestSpec::new(endpoint, body, options.timeout.unwrap_or(inner.timeout));
        spec.headers = inner.default_headers.clone();
        match api_key {
            Some(key) => spec.with_bearer(key),
            None => Ok(spec),
        }
    }

    /// Runs attempts until one succeeds, one fails fatally, or the policy
    /// runs out.
    async fn send_with_retry(
        &self,
        spec: &RequestSpec,
    ) -> std::result::Result<(String, StatusCode, usize), Exhausted> {
        let policy = &self.inner.retry_policy;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = self.execute_attempt(spec, attempt).await;
            match AttemptOutcome::classify(result, self.inner.retry_predicate.as_ref(), attempt) {
                AttemptOutcome::Success((content, status)) => {
                    return Ok((content, status, attempt));
                }
                AttemptOutcome::Fatal(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt = attempt,
                        endpoint = %spec.endpoint,
                        "Request failed - not retrying"
                    );
                    return Err(Exhausted {
                        error: e,
                        attempts: attempt,
                    });
                }
                AttemptOutcome::Retryable(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt = attempt,
                        endpoint = %spec.endpoint,
                        "Request failed"
                    );

                    match policy.delay_before_attempt(attempt + 1) {
                        Some(delay) => {
                            tracing::info!(
                                delay_ms = delay.as_millis(),
                                attempt = attempt,
                                "Retrying request after delay"
                            );
                            self.inner.sleeper.sleep(delay).await;
                        }
                        None => {
                            return Err(Exhausted {
                                error: Error::MaxRetriesExceeded {
                                    attempts: attempt,
                                    last_error: Box::new(e),
                                },
                                attempts: attempt,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Executes a single attempt under the request deadline.
    ///
    /// Dropping the in-flight future on timeout cancels the HTTP request.
    async fn execute_attempt(
        &self,
        spec: &RequestSpec,
        attempt: usize,
    ) -> Result<(String, StatusCode)> {
        tracing::debug!(
            url = %spec.endpoint,
            attempt = attempt,
            timeout_ms = spec.timeout.as_millis(),
            "Executing chat-completion request"
        );

        let request = self
            .inner
            .http_client
            .post(spec.endpoint.clone())
            .headers(spec.headers.clone())
            .json(&spec.body);

        let attempt_start = Instant::now();
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let raw_body = response.text().await?;
            Ok::<_, Error>((status, headers, raw_body))
        };

        let (status, headers, raw_body) = match tokio::time::timeout(spec.timeout, exchange).await
        {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = spec.timeout.as_millis(),
                    attempt = attempt,
                    "Request deadline exceeded - cancelled"
                );
                return Err(Error::Timeout);
            }
        };

        tracing::info!(
            status = status.as_u16(),
            latency_ms = attempt_start.elapsed().as_millis(),
            attempt = attempt,
            "Received HTTP response"
        );

        parse_response(status, headers, raw_body).map(|content| (content, status))
    }

    /// Ends a failed call: returns the error, or fallback content when a
    /// provider is configured.
    async fn fall_back(
        &self,
        exhausted: Exhausted,
        prompt: &str,
        fields: Option<&FallbackFields>,
        model: String,
        start_time: Instant,
    ) -> Result<Generation> {
        let Exhausted { error, attempts } = exhausted;
        let Some(fallback) = &self.inner.fallback else {
            return Err(error);
        };

        tracing::warn!(
            error = %error,
            attempts = attempts,
            "All attempts failed - serving fallback content"
        );

        let fields = match fields {
            Some(fields) => fields.clone(),
            None => fallback.extract_fields(prompt),
        };

        let latency = fallback.simulated_latency();
        if !latency.is_zero() {
            self.inner.sleeper.sleep(latency).await;
        }

        let content = fallback.render(&fields);
        Ok(Generation::fallback(
            content,
            model,
            error.summary(),
            attempts,
            start_time.elapsed(),
        ))
    }
}

/// Turns a completed HTTP exchange into content or a classified error.
fn parse_response(status: StatusCode, headers: HeaderMap, raw_body: String) -> Result<String> {
    if !status.is_success() {
        if status.is_client_error() {
            tracing::error!(
                status = status.as_u16(),
                response = %raw_body,
                "Client error (4xx)"
            );
        } else {
            tracing::warn!(
                status = status.as_u16(),
                response = %raw_body,
                "Server error"
            );
        }

        return Err(Error::HttpError {
            status,
            raw_response: raw_body,
            headers,
        });
    }

    let content = serde_json::from_str::<ChatCompletionResponse>(&raw_body)
        .map_err(|e| e.to_string())
        .and_then(ChatCompletionResponse::into_first_content);

    match content {
        Ok(content) => Ok(content),
        Err(reason) => {
            tracing::error!(
                reason = %reason,
                raw_response = %raw_body,
                "Malformed chat-completion response"
            );
            Err(Error::MalformedResponse {
                raw_response: raw_body,
                reason,
                status,
            })
        }
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use chatguard::{ClientBuilder, RetryPolicy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), chatguard::Error> {
/// let client = ClientBuilder::new()
///     .endpoint("http://localhost:3000/api/chat")?
///     .model("qwen-plus")
///     .retry_policy(RetryPolicy::new(4, Duration::from_millis(500), 2.0)?)
///     .default_header("X-Client", "store-report")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    http_client: Option<reqwest::Client>,
    endpoint: Option<Url>,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    default_headers: HeaderMap,
    retry_policy: RetryPolicy,
    retry_predicate: Option<Arc<dyn RetryPredicate>>,
    fallback: Option<Arc<dyn FallbackProvider>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    routes: ModelRoutes,
    max_request_bytes: Option<usize>,
    serialize_identical_requests: bool,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            http_client: None,
            endpoint: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            default_headers: HeaderMap::new(),
            retry_policy: RetryPolicy::default(),
            retry_predicate: None,
            fallback: None,
            sleeper: None,
            routes: ModelRoutes::new(),
            max_request_bytes: None,
            serialize_identical_requests: false,
        }
    }

    /// Creates a builder from environment variables.
    ///
    /// Reads:
    /// - `CHATGUARD_ENDPOINT` — chat-completion URL (required)
    /// - `CHATGUARD_API_KEY` — bearer token (required)
    /// - `CHATGUARD_MODEL` — model name (optional)
    /// - `CHATGUARD_TIMEOUT_MS` — per-attempt timeout (optional)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a required variable is missing or
    /// empty, or a value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let endpoint = required_env("CHATGUARD_ENDPOINT")?;
        let api_key = required_env("CHATGUARD_API_KEY")?;

        let mut builder = Self::new().endpoint(endpoint)?.api_key(api_key);

        if let Some(model) = optional_env("CHATGUARD_MODEL") {
            builder = builder.model(model);
        }
        if let Some(timeout) = optional_env("CHATGUARD_TIMEOUT_MS") {
            let millis = timeout.parse::<u64>().map_err(|e| {
                Error::Configuration(format!("CHATGUARD_TIMEOUT_MS is not a number: {}", e))
            })?;
            builder = builder.timeout(Duration::from_millis(millis));
        }
        Ok(builder)
    }

    /// Sets the default chat-completion URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn endpoint(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.endpoint = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the bearer token. A `Bearer ` prefix is optional.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = if key.trim().is_empty() {
            None
        } else {
            Some(key)
        };
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the persona sent as the system message.
    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the deadline for each attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets a custom retry predicate.
    ///
    /// By default, failures are retried based on [`Error::is_retryable`].
    pub fn retry_predicate(mut self, predicate: Box<dyn RetryPredicate>) -> Self {
        self.retry_predicate = Some(Arc::from(predicate));
        self
    }

    /// Registers a fallback provider used once all attempts have failed.
    pub fn fallback(mut self, provider: impl FallbackProvider + 'static) -> Self {
        self.fallback = Some(Arc::new(provider));
        self
    }

    /// Removes any registered fallback provider.
    pub fn without_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    /// Replaces the timer used for backoff and simulated latency.
    pub fn sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Routes specific model names to other endpoints.
    pub fn routes(mut self, routes: ModelRoutes) -> Self {
        self.routes = routes;
        self
    }

    /// Rejects requests whose serialized body is larger than `limit` bytes.
    pub fn max_request_bytes(mut self, limit: usize) -> Self {
        self.max_request_bytes = Some(limit);
        self
    }

    /// Makes overlapping calls with an identical endpoint and body run one
    /// after another.
    pub fn serialize_identical_requests(mut self, enabled: bool) -> Self {
        self.serialize_identical_requests = enabled;
        self
    }

    /// Uses an existing `reqwest::Client` instead of building one.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint was provided or a setting is out of
    /// range.
    pub fn build(self) -> Result<Client> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| Error::Configuration("Endpoint is required".to_string()))?;

        self.retry_policy.validate()?;
        validate_temperature(self.temperature)?;
        if self.max_tokens == 0 {
            return Err(Error::Configuration(
                "max_tokens must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Configuration("model must not be empty".to_string()));
        }
        if let Some(key) = &self.api_key {
            bearer_token(key)?;
        }

        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder().build().map_err(|e| {
                Error::Configuration(format!("Failed to build HTTP client: {}", e))
            })?,
        };

        let retry_predicate = self
            .retry_predicate
            .unwrap_or_else(|| Arc::new(RetryOnRetryable));
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                endpoint,
                api_key: self.api_key,
                model: self.model,
                system_prompt: self.system_prompt,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                timeout: self.timeout,
                default_headers: self.default_headers,
                retry_policy: self.retry_policy,
                retry_predicate,
                fallback: self.fallback,
                sleeper,
                routes: self.routes,
                max_request_bytes: self.max_request_bytes,
                inflight: self
                    .serialize_identical_requests
                    .then(InFlightRegistry::new),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn required_env(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .map_err(|_| Error::Configuration(format!("missing {} environment variable", name)))?;
    if value.trim().is_empty() {
        return Err(Error::Configuration(format!("{} is set but empty", name)));
    }
    Ok(value)
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
