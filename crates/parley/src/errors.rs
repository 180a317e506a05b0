use std::fmt;
use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::models::role::Role;

/// Every failure the client reports, grouped by where it happened
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Marshaling error: {0}")]
    Marshaling(#[from] MarshalingError),

    /// The provider sent an `error` frame; the stream is over
    #[error("Streaming error ({kind}): {message}")]
    Streaming { kind: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type ParleyResult<T> = Result<T, ParleyError>;

impl ParleyError {
    /// Whether repeating the same call could succeed. No retries happen here,
    /// this only helps callers decide.
    pub fn is_retryable(&self) -> bool {
        match self {
            ParleyError::Transport(TransportError::Status { kind, .. }) => kind.is_retryable(),
            ParleyError::Transport(TransportError::Network(_))
            | ParleyError::Transport(TransportError::Stream(_))
            | ParleyError::Transport(TransportError::UnexpectedEof) => true,
            ParleyError::Streaming { kind, .. } => {
                kind == ApiErrorKind::Overloaded.error_type()
                    || kind == ApiErrorKind::RateLimit.error_type()
                    || kind == ApiErrorKind::Api.error_type()
            }
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing API key: set one on the config builder")]
    MissingApiKey,

    #[error("API key contains characters that cannot be sent in a header")]
    InvalidApiKey,

    #[error("Missing model: set one on the config builder")]
    MissingModel,

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{tag} content is missing required field `{field}`")]
    MissingField {
        tag: &'static str,
        field: &'static str,
    },

    #[error("Only base64 image sources are supported, got {0:?}")]
    UnsupportedImageSource(String),

    #[error("Invalid media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Invalid content type: {0}")]
    UnknownContentType(String),

    #[error("Invalid tool result content type: {0}")]
    UnsupportedToolResultContent(String),

    #[error("Invalid content block {index}: {source}")]
    InvalidBlock {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("Invalid message {index} in conversation: {source}")]
    InvalidMessage {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },

    #[error("Message has no content")]
    EmptyMessage,

    #[error("Conversation has no messages")]
    EmptyConversation,

    #[error("Conversation must start with a user message")]
    FirstMessageNotUser,

    #[error("Message {index} repeats the {role} role of the message before it")]
    RolesNotAlternating { index: usize, role: Role },

    #[error("top_p and temperature cannot be used together")]
    ConflictingSampling,

    #[error("Tool use is not supported while streaming")]
    ToolUseWhileStreaming,

    #[error("max_tokens {requested} exceeds the maximum of {max} for model {model}")]
    MaxTokensExceeded {
        model: String,
        requested: u32,
        max: u32,
    },

    #[error("max_tokens must be at least 1")]
    ZeroMaxTokens,

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("Tool choice names a tool that was not provided: {0}")]
    UnknownToolChoice(String),

    #[error("Conversation changed while the reply was streaming")]
    ConversationChanged,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {status}: {kind} for {url}")]
    Status {
        status: StatusCode,
        kind: ApiErrorKind,
        url: String,
        body: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Reading the event stream failed: {0}")]
    Stream(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Connection closed before message_stop")]
    UnexpectedEof,
}

impl TransportError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Network(err) => err.status(),
            _ => None,
        }
    }
}

/*
    https://docs.anthropic.com/claude/reference/errors
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RequestTooLarge,
    RateLimit,
    Api,
    Overloaded,
    Other,
}

impl ApiErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 => ApiErrorKind::InvalidRequest,
            401 => ApiErrorKind::Authentication,
            403 => ApiErrorKind::Permission,
            404 => ApiErrorKind::NotFound,
            413 => ApiErrorKind::RequestTooLarge,
            429 => ApiErrorKind::RateLimit,
            500 => ApiErrorKind::Api,
            529 => ApiErrorKind::Overloaded,
            _ => ApiErrorKind::Other,
        }
    }

    /// The `type` the API uses for this category in error bodies and frames
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiErrorKind::InvalidRequest => "invalid_request_error",
            ApiErrorKind::Authentication => "authentication_error",
            ApiErrorKind::Permission => "permission_error",
            ApiErrorKind::NotFound => "not_found_error",
            ApiErrorKind::RequestTooLarge => "request_too_large",
            ApiErrorKind::RateLimit => "rate_limit_error",
            ApiErrorKind::Api => "api_error",
            ApiErrorKind::Overloaded => "overloaded_error",
            ApiErrorKind::Other => "unknown_error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ApiErrorKind::InvalidRequest => {
                "There was an issue with the format or content of your request"
            }
            ApiErrorKind::Authentication => "There's an issue with your API key",
            ApiErrorKind::Permission => {
                "Your API key does not have permission to use the specified resource"
            }
            ApiErrorKind::NotFound => "The requested resource was not found",
            ApiErrorKind::RequestTooLarge => {
                "The request exceeds the maximum allowed number of bytes"
            }
            ApiErrorKind::RateLimit => "Your account has hit a rate limit",
            ApiErrorKind::Api => "An unexpected error has occurred internal to the API",
            ApiErrorKind::Overloaded => "The API is temporarily overloaded",
            ApiErrorKind::Other => "The API returned an unrecognised status",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiErrorKind::RateLimit | ApiErrorKind::Api | ApiErrorKind::Overloaded
        )
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type(), self.description())
    }
}

#[derive(Error, Debug)]
pub enum MarshalingError {
    #[error("marshaling input: {0}")]
    Input(#[source] serde_json::Error),

    #[error("marshaling reply: {0}")]
    Reply(#[source] serde_json::Error),

    #[error("reply has no usable content: {0}")]
    UnusableReply(#[source] ValidationError),

    #[error("decoding {event} frame: {source}")]
    Frame {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{event} frame arrived before message_start")]
    OutOfOrder { event: String },

    #[error("malformed event stream: {0}")]
    EventStream(String),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("conversation file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("error reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error writing {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error decoding {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("error encoding conversation: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("{} has unsupported format version {version}", .path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },

    #[error("no conversation file is configured")]
    NotConfigured,
}
