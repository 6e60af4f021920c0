//! Error types for Geppetto.

pub mod kind;

pub use kind::ErrorKind;

use thiserror::Error;

/// Primary error type for all Geppetto operations.
#[derive(Error, Debug)]
pub enum GeppettoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("responses api error: status={status} body={body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Stream protocol error: {0}")]
    StreamProtocol(String),

    /// Structured error reported by the provider, either as an `error`
    /// stream event or a `response.failed` envelope.
    #[error("{message}")]
    Provider {
        code: Option<String>,
        message: String,
    },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl GeppettoError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn stream_protocol(message: impl Into<String>) -> Self {
        Self::StreamProtocol(message.into())
    }

    /// Non-2xx response from the provider.
    pub fn transport_status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Provider error with an optional code, rendered as
    /// `<prefix> (<code>): <message>` when a code is present.
    pub fn provider(prefix: &str, code: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = match &code {
            Some(code) => format!("{prefix} ({code}): {message}"),
            None => message,
        };
        Self::Provider { code, message }
    }

    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into the runtime's error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Status { .. } | Self::Network(_) | Self::Io(_) => ErrorKind::Transport,
            Self::StreamProtocol(_) => ErrorKind::StreamProtocol,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::ToolExecution { .. } => ErrorKind::ToolExecution,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Json(_) | Self::Yaml(_) | Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::Transport => match self.status() {
                Some(status) => status == 429 || (500..=599).contains(&status),
                None => !matches!(self, Self::Io(_)),
            },
            _ => false,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, GeppettoError>;
