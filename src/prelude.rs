//! Convenience re-exports for common use.

pub use crate::config::EngineSettings;
pub use crate::context::InferenceContext;
pub use crate::engine::{Engine, InferenceConfig};
pub use crate::error::{ErrorKind, GeppettoError, Result};
pub use crate::events::{
    publish_event_to_context, ChannelSink, CollectingSink, Event, EventPayload, EventSink,
};
pub use crate::middleware::{
    AgentModeMiddleware, EngineWithMiddleware, Middleware, SystemPromptMiddleware,
    ToolMiddleware, ToolMiddlewareConfig, ToolResultReorderMiddleware, TurnLoggingMiddleware,
};
pub use crate::provider::ResponsesEngine;
pub use crate::tools::{MockToolbox, ToolConfig, ToolDefinition, Toolbox};
pub use crate::turns::{Block, BlockKind, Run, Turn};
