//! Network-free fallback content.
//!
//! When every attempt has failed, the client asks a [`FallbackProvider`] for
//! a stand-in document. The stock [`TemplateFallback`] fills a fixed HTML
//! template from a [`FallbackFields`] map, so the caller always gets
//! something it can render.

use handlebars::Handlebars;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Named values substituted into a fallback template.
///
/// Keys are kept sorted, so iteration order (and therefore any output
/// derived from it) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FallbackFields(BTreeMap<String, String>);

impl FallbackFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, replacing any previous value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns `defaults` overlaid with every non-blank value of `self`.
    pub fn merged_over(&self, defaults: &FallbackFields) -> FallbackFields {
        let mut merged = defaults.clone();
        for (name, value) in self.iter() {
            if !value.trim().is_empty() {
                merged.insert(name, value.trim());
            }
        }
        merged
    }
}

impl<K, V> FromIterator<(K, V)> for FallbackFields
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Produces stand-in content when the remote service is unavailable.
///
/// Implementations must not fail: `render` returns plain content.
pub trait FallbackProvider: Send + Sync {
    /// Best-effort field extraction from a free-text prompt.
    ///
    /// Only used when the caller did not pass structured fields.
    fn extract_fields(&self, _prompt: &str) -> FallbackFields {
        FallbackFields::new()
    }

    /// Renders the fallback document.
    fn render(&self, fields: &FallbackFields) -> String;

    /// How long the client waits before returning the rendered content.
    fn simulated_latency(&self) -> Duration {
        Duration::ZERO
    }
}

/// Pulls `label: value` lines out of a prompt with regular expressions.
///
/// Each pattern must contain one capture group; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct FieldExtractor {
    patterns: Vec<(String, Regex)>,
}

impl FieldExtractor {
    /// An extractor with no patterns.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Recognizes store name, category, price range and location in English
    /// or Chinese labels, separated by `:` or `：`.
    pub fn store_profile() -> Self {
        const PATTERNS: &[(&str, &str)] = &[
            ("store_name", r"(?:store name|shop name|brand name|店铺名称|门店名称|店名|品牌名称)"),
            ("category", r"(?:category|business type|cuisine|经营品类|品类|业态|菜系)"),
            ("price_range", r"(?:price range|average spend|价格区间|价格带|客单价|人均消费)"),
            ("location", r"(?:location|address|city|所在城市|所在地区|地址|位置)"),
        ];

        let patterns = PATTERNS
            .iter()
            .filter_map(|(field, label)| {
                let pattern = format!(r"(?im)^[\s\-*•]*{}\s*[:：]\s*(.+?)\s*$", label);
                Regex::new(&pattern).ok().map(|re| ((*field).to_string(), re))
            })
            .collect();
        Self { patterns }
    }

    /// Adds a pattern for `field`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the pattern does not
    /// compile or has no capture group.
    pub fn with_pattern(
        mut self,
        field: impl Into<String>,
        pattern: &str,
    ) -> crate::Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| crate::Error::Configuration(format!("Invalid pattern: {}", e)))?;
        if re.captures_len() < 2 {
            return Err(crate::Error::Configuration(format!(
                "Pattern `{}` has no capture group",
                pattern
            )));
        }
        self.patterns.push((field.into(), re));
        Ok(self)
    }

    pub fn extract(&self, text: &str) -> FallbackFields {
        let mut fields = FallbackFields::new();
        for (field, re) in &self.patterns {
            if fields.get(field).is_some() {
                continue;
            }
            let value = re
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim())
                .filter(|v| !v.is_empty());
            if let Some(value) = value {
                fields.insert(field.clone(), value);
            }
        }
        fields
    }
}

const STORE_REPORT_TEMPLATE: &str = r#"<div class="report report-fallback">
  <h2>{{store_name}} · Operations Overview</h2>
  <section>
    <h3>Store Profile</h3>
    <ul>
      <li><strong>Store:</strong> {{store_name}}</li>
      <li><strong>Category:</strong> {{category}}</li>
      <li><strong>Price range:</strong> {{price_range}}</li>
      <li><strong>Location:</strong> {{location}}</li>
    </ul>
  </section>
  <section>
    <h3>Recommendations</h3>
    <ol>
      <li>Keep the core {{category}} menu focused and promote the three best sellers.</li>
      <li>Check that pricing stays consistent with the {{price_range}} positioning.</li>
      <li>Run a weekday off-peak promotion for customers around {{location}}.</li>
    </ol>
  </section>
  <p class="note">This report was generated offline from a template.</p>
</div>"#;

/// Fills an HTML template containing `{{field}}` placeholders.
///
/// The template is compiled with Handlebars when the fallback is built.
/// Values are HTML-escaped, and placeholders with no value and no default
/// render as an empty string.
///
/// # Examples
///
/// ```
/// use chatguard::{FallbackFields, FallbackProvider, TemplateFallback};
///
/// # fn example() -> Result<(), chatguard::Error> {
/// let fallback = TemplateFallback::store_report()?;
/// let html = fallback.render(&FallbackFields::new().with("store_name", "Noodle House"));
/// assert!(html.contains("Noodle House"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TemplateFallback {
    template: String,
    registry: Handlebars<'static>,
    defaults: FallbackFields,
    extractor: FieldExtractor,
    latency: Duration,
}

impl TemplateFallback {
    /// Default simulated latency.
    pub const DEFAULT_LATENCY: Duration = Duration::from_secs(2);

    /// Longest simulated latency accepted by [`with_latency`](Self::with_latency).
    pub const MAX_LATENCY: Duration = Duration::from_secs(10);

    /// Compiles `template`, with no defaults and no extraction patterns.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the template does not parse.
    pub fn new(template: impl Into<String>) -> crate::Result<Self> {
        let template = template.into();
        let mut registry = Handlebars::new();
        registry
            .register_template_string(TEMPLATE_NAME, &template)
            .map_err(|e| crate::Error::Configuration(format!("Invalid fallback template: {}", e)))?;

        Ok(Self {
            template,
            registry,
            defaults: FallbackFields::new(),
            extractor: FieldExtractor::empty(),
            latency: Self::DEFAULT_LATENCY,
        })
    }

    /// The stock store-operations report.
    pub fn store_report() -> crate::Result<Self> {
        Ok(Self::new(STORE_REPORT_TEMPLATE)?
            .with_defaults(
                FallbackFields::new()
                    .with("store_name", "Your Store")
                    .with("category", "Restaurant")
                    .with("price_range", "Mid-range")
                    .with("location", "Local area"),
            )
            .with_extractor(FieldExtractor::store_profile()))
    }

    pub fn with_defaults(mut self, defaults: FallbackFields) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_extractor(mut self, extractor: FieldExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Sets the simulated latency, capped at [`MAX_LATENCY`](Self::MAX_LATENCY).
    /// `Duration::ZERO` disables the wait.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency.min(Self::MAX_LATENCY);
        self
    }

    pub fn defaults(&self) -> &FallbackFields {
        &self.defaults
    }
}

const TEMPLATE_NAME: &str = "fallback";

impl FallbackProvider for TemplateFallback {
    fn extract_fields(&self, prompt: &str) -> FallbackFields {
        self.extractor.extract(prompt)
    }

    fn render(&self, fields: &FallbackFields) -> String {
        let values = fields.merged_over(&self.defaults);
        self.registry
            .render(TEMPLATE_NAME, &values)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Fallback template failed to render");
                self.template.clone()
            })
    }

    fn simulated_latency(&self) -> Duration {
        self.latency
    }
}
