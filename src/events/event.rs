//! Typed lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::metadata::EventMetadata;
use crate::error::{ErrorKind, GeppettoError};

/// A tool call announced by the model. `input` is the raw argument string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: String,
}

/// The outcome of executing a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub result: String,
}

/// Serializable description of an error event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&GeppettoError> for ErrorInfo {
    fn from(err: &GeppettoError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Concrete event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventPayload {
    Start,
    Partial {
        delta: String,
        completion: String,
    },
    PartialThinking {
        delta: String,
        completion: String,
    },
    ReasoningTextDelta {
        delta: String,
    },
    ReasoningTextDone {
        text: String,
    },
    Info {
        message: String,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        data: Map<String, Value>,
    },
    Log {
        level: String,
        message: String,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        fields: Map<String, Value>,
    },
    ToolCall {
        tool_call: ToolCall,
    },
    ToolResult {
        tool_result: ToolResult,
    },
    ToolCallExecute {
        tool_call: ToolCall,
    },
    ToolCallExecutionResult {
        tool_result: ToolResult,
    },
    Citation {
        title: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_index: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_index: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_index: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_index: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        annotation_index: Option<i64>,
    },
    WebSearchStarted {
        item_id: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        query: String,
    },
    WebSearchSearching {
        item_id: String,
    },
    WebSearchOpenPage {
        item_id: String,
        url: String,
    },
    WebSearchDone {
        item_id: String,
    },
    AgentModeSwitch {
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        analysis: String,
    },
    Final {
        text: String,
    },
    Error {
        error: ErrorInfo,
    },
}

impl EventPayload {
    /// Wire type string, e.g. `partial` or `tool-call`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Partial { .. } => "partial",
            Self::PartialThinking { .. } => "partial-thinking",
            Self::ReasoningTextDelta { .. } => "reasoning-text-delta",
            Self::ReasoningTextDone { .. } => "reasoning-text-done",
            Self::Info { .. } => "info",
            Self::Log { .. } => "log",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::ToolCallExecute { .. } => "tool-call-execute",
            Self::ToolCallExecutionResult { .. } => "tool-call-execution-result",
            Self::Citation { .. } => "citation",
            Self::WebSearchStarted { .. } => "web-search-started",
            Self::WebSearchSearching { .. } => "web-search-searching",
            Self::WebSearchOpenPage { .. } => "web-search-open-page",
            Self::WebSearchDone { .. } => "web-search-done",
            Self::AgentModeSwitch { .. } => "agent-mode-switch",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
        }
    }
}

/// Envelope for a published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub metadata: EventMetadata,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Wrap a payload, stamping a fresh event id and the current time.
    pub fn new(metadata: &EventMetadata, payload: EventPayload) -> Self {
        let mut metadata = metadata.clone();
        metadata.event_id = Uuid::new_v4();
        Self {
            metadata,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.payload.type_name()
    }

    pub fn start(metadata: &EventMetadata) -> Self {
        Self::new(metadata, EventPayload::Start)
    }

    pub fn partial(metadata: &EventMetadata, delta: &str, completion: &str) -> Self {
        Self::new(
            metadata,
            EventPayload::Partial {
                delta: delta.to_string(),
                completion: completion.to_string(),
            },
        )
    }

    pub fn thinking_partial(metadata: &EventMetadata, delta: &str, completion: &str) -> Self {
        Self::new(
            metadata,
            EventPayload::PartialThinking {
                delta: delta.to_string(),
                completion: completion.to_string(),
            },
        )
    }

    pub fn reasoning_text_delta(metadata: &EventMetadata, delta: &str) -> Self {
        Self::new(
            metadata,
            EventPayload::ReasoningTextDelta {
                delta: delta.to_string(),
            },
        )
    }

    pub fn reasoning_text_done(metadata: &EventMetadata, text: &str) -> Self {
        Self::new(
            metadata,
            EventPayload::ReasoningTextDone {
                text: text.to_string(),
            },
        )
    }

    pub fn info(metadata: &EventMetadata, message: &str, data: Map<String, Value>) -> Self {
        Self::new(
            metadata,
            EventPayload::Info {
                message: message.to_string(),
                data,
            },
        )
    }

    pub fn tool_call(metadata: &EventMetadata, tool_call: ToolCall) -> Self {
        Self::new(metadata, EventPayload::ToolCall { tool_call })
    }

    pub fn tool_call_execute(metadata: &EventMetadata, tool_call: ToolCall) -> Self {
        Self::new(metadata, EventPayload::ToolCallExecute { tool_call })
    }

    pub fn tool_call_execution_result(metadata: &EventMetadata, tool_result: ToolResult) -> Self {
        Self::new(metadata, EventPayload::ToolCallExecutionResult { tool_result })
    }

    pub fn log(
        metadata: &EventMetadata,
        level: &str,
        message: &str,
        fields: Map<String, Value>,
    ) -> Self {
        Self::new(
            metadata,
            EventPayload::Log {
                level: level.to_string(),
                message: message.to_string(),
                fields,
            },
        )
    }

    /// A mode transition, or an analysis without a switch when `from == to`.
    pub fn agent_mode_switch(metadata: &EventMetadata, from: &str, to: &str, analysis: &str) -> Self {
        Self::new(
            metadata,
            EventPayload::AgentModeSwitch {
                from: from.to_string(),
                to: to.to_string(),
                analysis: analysis.to_string(),
            },
        )
    }

    pub fn final_text(metadata: &EventMetadata, text: &str) -> Self {
        Self::new(
            metadata,
            EventPayload::Final {
                text: text.to_string(),
            },
        )
    }

    pub fn error(metadata: &EventMetadata, err: &GeppettoError) -> Self {
        Self::new(metadata, EventPayload::Error { error: err.into() })
    }
}
