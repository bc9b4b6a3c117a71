//! Per-call generation options and their range checks.

/// Per-call overrides for [`Client::generate_content`].
///
/// Unset fields fall back to the values configured on the client.
///
/// [`Client::generate_content`]: crate::Client::generate_content
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationOptions {
    /// Model name; also selects a route when the client has [`ModelRoutes`].
    ///
    /// [`ModelRoutes`]: crate::ModelRoutes
    pub model: Option<String>,
    /// Sampling temperature in `[0.0, 2.0]`.
    pub temperature: Option<f32>,
    /// Maximum output tokens, at least 1.
    pub max_tokens: Option<u32>,
    /// Deadline for each attempt of this call.
    pub timeout: Option<std::time::Duration>,
}

impl GenerationOptions {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(t) = self.temperature {
            validate_temperature(t)?;
        }
        if self.max_tokens == Some(0) {
            return Err(crate::Error::Configuration(
                "max_tokens must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(crate::Error::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(crate::Error::Configuration(
                "model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_temperature(temperature: f32) -> crate::Result<()> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(crate::Error::Configuration(format!(
            "temperature must be within 0.0..=2.0, got {}",
            temperature
        )));
    }
    Ok(())
}
