//! Event bus: typed lifecycle events fanned out to context-attached sinks.

pub mod event;
pub mod metadata;
pub mod sink;

pub use event::{ErrorInfo, Event, EventPayload, ToolCall, ToolResult};
pub use metadata::{EventMetadata, Usage};
pub use sink::{
    publish_event_to_context, ChannelSink, CollectingSink, EventCallback, EventSink, FnSink,
};
