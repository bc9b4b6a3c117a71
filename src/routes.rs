//! Model-keyed endpoint selection.
//!
//! Lets one client talk to several upstream providers: the effective model
//! name of a call picks the endpoint, and the route may carry its own API key
//! used when the client was built without one.

use std::collections::HashMap;
use std::fmt;
use url::Url;

/// An upstream endpoint for one model.
#[derive(Clone, PartialEq, Eq)]
pub struct Route {
    /// Chat-completion URL.
    pub endpoint: Url,
    /// Key injected when the client has none of its own.
    pub api_key: Option<String>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Table of model name → [`Route`].
///
/// # Examples
///
/// ```
/// use chatguard::ModelRoutes;
///
/// let routes = ModelRoutes::new()
///     .route("deepseek-chat", "https://api.deepseek.com/v1/chat/completions", Some("sk-ds"))
///     .unwrap()
///     .route("qwen-plus", "https://dashscope.example.com/v1/chat/completions", None::<String>)
///     .unwrap();
///
/// assert!(routes.get("deepseek-chat").is_some());
/// assert!(routes.get("gpt-4o").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRoutes {
    routes: HashMap<String, Route>,
}

impl ModelRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the route for `model`.
    ///
    /// # Errors
    ///
    /// Returns an error if `endpoint` is not a valid URL.
    pub fn route(
        mut self,
        model: impl Into<String>,
        endpoint: impl AsRef<str>,
        api_key: Option<impl Into<String>>,
    ) -> crate::Result<Self> {
        let endpoint = Url::parse(endpoint.as_ref())?;
        let api_key: Option<String> = api_key
            .map(|k| k.into())
            .filter(|k: &String| !k.trim().is_empty());
        self.routes
            .insert(model.into(), Route { endpoint, api_key });
        Ok(self)
    }

    pub fn get(&self, model: &str) -> Option<&Route> {
        self.routes.get(model)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }
}
