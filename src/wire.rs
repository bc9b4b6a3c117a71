//! Chat-completion wire format.

use serde::{Deserialize, Serialize};

/// Request body posted to the chat-completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
}

/// Response body. Every level is optional so that a missing field shows up
/// as `None` instead of a serde error.
#[derive(Debug, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// Returns `choices[0].message.content`, or a description of what was
    /// missing.
    pub fn into_first_content(self) -> Result<String, String> {
        let choices = self.choices.ok_or_else(|| "missing `choices`".to_owned())?;
        let first = choices
            .into_iter()
            .next()
            .ok_or_else(|| "empty `choices` array".to_owned())?;
        let message = first
            .message
            .ok_or_else(|| "missing `choices[0].message`".to_owned())?;
        message
            .content
            .ok_or_else(|| "missing `choices[0].message.content`".to_owned())
    }
}
