use std::collections::HashSet;

use serde::Serialize;

use crate::errors::ValidationError;
use crate::models::catalog::ModelSpec;
use crate::models::content::ContentBlock;
use crate::models::conversation::Conversation;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolChoice};

/// Per-call generation settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    /// Defaults to the model's maximum when unset
    pub max_tokens: Option<u32>,
    pub system: Option<String>,
    pub user_id: Option<String>,
    pub stop_sequences: Vec<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub tools: Vec<Tool>,
    pub tool_choice: Option<ToolChoice>,
    pub stream: bool,
}

impl GenerationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_system<S: Into<String>>(mut self, system: S) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_user_id<S: Into<String>>(mut self, user_id: S) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_stop_sequence<S: Into<String>>(mut self, sequence: S) -> Self {
        self.stop_sequences.push(sequence.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// A message as it is sent back to the API: role and content only
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageParam {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl From<&Message> for MessageParam {
    fn from(message: &Message) -> Self {
        MessageParam {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// The JSON body of a Messages API call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<MessageParam>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

impl GenerationRequest {
    /// Assemble a request from the conversation history. The history is only
    /// read, so building can be repeated freely.
    pub fn build(
        conversation: &Conversation,
        params: &GenerationParams,
        model: &ModelSpec,
    ) -> Result<Self, ValidationError> {
        check_options(
            params.temperature,
            params.top_p,
            &params.tools,
            params.stream,
        )?;
        check_tools(&params.tools, params.tool_choice.as_ref())?;

        let max_tokens = params.max_tokens.unwrap_or(model.max_output_tokens);
        if max_tokens == 0 {
            return Err(ValidationError::ZeroMaxTokens);
        }
        if max_tokens > model.max_output_tokens {
            return Err(ValidationError::MaxTokensExceeded {
                model: model.name.to_string(),
                requested: max_tokens,
                max: model.max_output_tokens,
            });
        }

        conversation.validate()?;

        Ok(GenerationRequest {
            model: model.name.to_string(),
            messages: conversation.messages.iter().map(MessageParam::from).collect(),
            max_tokens,
            system: params.system.clone(),
            metadata: params.user_id.as_ref().map(|user_id| Metadata {
                user_id: Some(user_id.clone()),
            }),
            stop_sequences: params.stop_sequences.clone(),
            stream: params.stream,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            tool_choice: params.tool_choice.clone(),
            tools: params.tools.clone(),
        })
    }

    /// Checks that must hold before a streaming connection is opened
    pub fn preflight(&self) -> Result<(), ValidationError> {
        check_options(self.temperature, self.top_p, &self.tools, self.stream)
    }
}

fn check_options(
    temperature: Option<f32>,
    top_p: Option<f32>,
    tools: &[Tool],
    stream: bool,
) -> Result<(), ValidationError> {
    if stream && !tools.is_empty() {
        return Err(ValidationError::ToolUseWhileStreaming);
    }
    if temperature.is_some() && top_p.is_some() {
        return Err(ValidationError::ConflictingSampling);
    }
    Ok(())
}

fn check_tools(tools: &[Tool], choice: Option<&ToolChoice>) -> Result<(), ValidationError> {
    let mut names = HashSet::new();
    for tool in tools {
        if !names.insert(tool.name.as_str()) {
            return Err(ValidationError::DuplicateTool(tool.name.clone()));
        }
    }
    if let Some(ToolChoice::Tool { name }) = choice {
        if !names.contains(name.as_str()) {
            return Err(ValidationError::UnknownToolChoice(name.clone()));
        }
    }
    Ok(())
}
