use serde::{Deserialize, Serialize};

use super::content::ContentBlock;
use super::role::Role;
use super::usage::Usage;
use crate::errors::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Why generation ended
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    /// A reason this client does not know yet
    #[serde(untagged)]
    Other(String),
}

impl StopReason {
    pub fn description(&self) -> &str {
        match self {
            StopReason::EndTurn => "the model reached a natural stopping point",
            StopReason::MaxTokens => "we exceeded the requested max_tokens or the model's maximum",
            StopReason::StopSequence => "one of your provided custom stop_sequences was generated",
            StopReason::ToolUse => "the model requests use of a tool",
            StopReason::Other(reason) => reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from the model, with the provider metadata of replies
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Message {
            id: None,
            role,
            content,
            model: None,
            stop_reason: None,
            stop_sequence: None,
            usage: None,
        }
    }

    /// Create an empty user message
    pub fn user() -> Self {
        Self::new(Role::User, Vec::new())
    }

    /// Create an empty assistant message
    pub fn assistant() -> Self {
        Self::new(Role::Assistant, Vec::new())
    }

    pub fn with_content(mut self, content: ContentBlock) -> Self {
        self.content.push(content);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(ContentBlock::text(text))
    }

    /// All text blocks joined together
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.content.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        for (index, block) in self.content.iter().enumerate() {
            block
                .validate()
                .map_err(|source| ValidationError::InvalidBlock {
                    index,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}
