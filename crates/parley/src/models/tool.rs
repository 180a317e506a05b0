use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool the model may ask to use
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the input the tool accepts
    pub input_schema: Value,
}

impl Tool {
    /// Create a new tool with the given name, description and input schema
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

/// How the model should use the provided tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides whether to use a tool
    Auto,
    /// The model must use one of the tools
    Any,
    /// The model must use the named tool
    Tool { name: String },
}

impl ToolChoice {
    pub fn tool<S: Into<String>>(name: S) -> Self {
        ToolChoice::Tool { name: name.into() }
    }
}
