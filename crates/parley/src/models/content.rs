use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ValidationError;

/// The only image source encoding the API accepts
pub const BASE64_SOURCE: &str = "base64";

/// Image media types the API accepts
pub const SUPPORTED_MEDIA_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

// Fields default to empty so a block with a missing field still decodes and
// validation can name what is missing.

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ImageSource>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolUseBlock {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResultBlock {
    #[serde(default)]
    pub tool_use_id: String,
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// An item nested inside a tool result
pub enum ToolResultContent {
    Text(TextBlock),
    Image(ImageBlock),
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// One typed unit of message content
pub enum ContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    /// Anything with a tag we do not recognise, kept verbatim
    #[serde(untagged)]
    Unknown(Value),
}

impl ContentBlock {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentBlock::Text(TextBlock { text: text.into() })
    }

    /// Image from data that is already base64 encoded
    pub fn image_base64<S: Into<String>, T: Into<String>>(data: S, media_type: T) -> Self {
        ContentBlock::Image(ImageBlock {
            source: Some(ImageSource {
                kind: BASE64_SOURCE.to_string(),
                media_type: media_type.into(),
                data: data.into(),
            }),
        })
    }

    /// Image from raw bytes, encoded here
    pub fn image_bytes<T: Into<String>>(bytes: &[u8], media_type: T) -> Self {
        Self::image_base64(STANDARD.encode(bytes), media_type)
    }

    pub fn tool_use<S: Into<String>, N: Into<String>>(id: S, name: N, input: Value) -> Self {
        ContentBlock::ToolUse(ToolUseBlock {
            id: id.into(),
            name: name.into(),
            input,
        })
    }

    pub fn tool_result<S: Into<String>>(
        tool_use_id: S,
        content: Vec<ToolResultContent>,
        is_error: Option<bool>,
    ) -> Self {
        ContentBlock::ToolResult(ToolResultBlock {
            tool_use_id: tool_use_id.into(),
            content,
            is_error,
        })
    }

    /// The wire tag of this block
    pub fn tag(&self) -> &str {
        match self {
            ContentBlock::Text(_) => "text",
            ContentBlock::Image(_) => "image",
            ContentBlock::ToolUse(_) => "tool_use",
            ContentBlock::ToolResult(_) => "tool_result",
            ContentBlock::Unknown(value) => unknown_tag(value),
        }
    }

    /// Get the text content if this is a text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUseBlock> {
        match self {
            ContentBlock::ToolUse(tool_use) => Some(tool_use),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ContentBlock::Text(text) => validate_text(text, "text"),
            ContentBlock::Image(image) => validate_image(image, "image"),
            ContentBlock::ToolUse(tool_use) => validate_tool_use(tool_use),
            ContentBlock::ToolResult(result) => validate_tool_result(result),
            ContentBlock::Unknown(value) => Err(ValidationError::UnknownContentType(
                unknown_tag(value).to_string(),
            )),
        }
    }
}

impl ToolResultContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ToolResultContent::Text(TextBlock { text: text.into() })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ToolResultContent::Text(text) => validate_text(text, "tool result text"),
            ToolResultContent::Image(image) => validate_image(image, "tool result image"),
            ToolResultContent::Unknown(value) => Err(
                ValidationError::UnsupportedToolResultContent(unknown_tag(value).to_string()),
            ),
        }
    }
}

fn unknown_tag(value: &Value) -> &str {
    value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
}

fn validate_text(block: &TextBlock, tag: &'static str) -> Result<(), ValidationError> {
    if block.text.is_empty() {
        return Err(ValidationError::MissingField { tag, field: "text" });
    }
    Ok(())
}

fn validate_image(block: &ImageBlock, tag: &'static str) -> Result<(), ValidationError> {
    let source = block
        .source
        .as_ref()
        .ok_or(ValidationError::MissingField {
            tag,
            field: "source",
        })?;

    if source.kind != BASE64_SOURCE {
        return Err(ValidationError::UnsupportedImageSource(source.kind.clone()));
    }
    if !SUPPORTED_MEDIA_TYPES.contains(&source.media_type.as_str()) {
        return Err(ValidationError::UnsupportedMediaType(
            source.media_type.clone(),
        ));
    }
    if source.data.is_empty() {
        return Err(ValidationError::MissingField { tag, field: "data" });
    }
    Ok(())
}

fn validate_tool_use(block: &ToolUseBlock) -> Result<(), ValidationError> {
    let tag = "tool_use";
    if block.id.is_empty() {
        return Err(ValidationError::MissingField { tag, field: "id" });
    }
    if block.name.is_empty() {
        return Err(ValidationError::MissingField { tag, field: "name" });
    }
    if block.input.is_null() {
        return Err(ValidationError::MissingField {
            tag,
            field: "input",
        });
    }
    Ok(())
}

fn validate_tool_result(block: &ToolResultBlock) -> Result<(), ValidationError> {
    let tag = "tool_result";
    if block.tool_use_id.is_empty() {
        return Err(ValidationError::MissingField {
            tag,
            field: "tool_use_id",
        });
    }
    if block.content.is_empty() {
        return Err(ValidationError::MissingField {
            tag,
            field: "content",
        });
    }
    block.content.iter().try_for_each(ToolResultContent::validate)
}
