//! Tool system: definitions, registries, configuration, and toolboxes.

pub mod config;
pub mod definition;
pub mod registry;
pub mod toolbox;

pub use config::{RetryConfig, ToolChoice, ToolConfig, ToolErrorHandling};
pub use definition::{empty_object_schema, object_schema, ParameterBuilder, ToolDefinition};
pub use registry::{InMemoryToolRegistry, ToolRegistry};
pub use toolbox::{MockToolbox, ToolDescription, ToolHandler, Toolbox};
