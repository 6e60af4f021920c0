//! Toolbox: executes tools by name.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::definition::ToolDefinition;
use crate::context::InferenceContext;
use crate::error::{GeppettoError, Result};

/// A tool as described to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<ToolDescription> for ToolDefinition {
    fn from(d: ToolDescription) -> Self {
        ToolDefinition::new(d.name, d.description, d.parameters)
    }
}

/// Runtime interface for executing tools the model may call.
#[async_trait]
pub trait Toolbox: Send + Sync {
    async fn execute_tool(&self, ctx: &InferenceContext, name: &str, args: Value) -> Result<Value>;

    fn get_tool_descriptions(&self) -> Vec<ToolDescription>;
}

/// Type alias for a tool handler function.
pub type ToolHandler =
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync;

struct RegisteredTool {
    description: ToolDescription,
    handler: Arc<ToolHandler>,
}

/// Toolbox keyed by name that delegates to registered closures.
#[derive(Default)]
pub struct MockToolbox {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
}

impl MockToolbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool<F, Fut>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let name = name.into();
        let tool = RegisteredTool {
            description: ToolDescription {
                name: name.clone(),
                description: description.into(),
                parameters,
            },
            handler: Arc::new(move |args| Box::pin(handler(args))),
        };
        if let Ok(mut tools) = self.tools.write() {
            tools.insert(name, tool);
        }
    }

    /// Builder-style registration.
    pub fn with_tool<F, Fut>(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_tool(name, description, parameters, handler);
        self
    }
}

#[async_trait]
impl Toolbox for MockToolbox {
    async fn execute_tool(&self, _ctx: &InferenceContext, name: &str, args: Value) -> Result<Value> {
        let handler = self
            .tools
            .read()
            .ok()
            .and_then(|tools| tools.get(name).map(|t| t.handler.clone()))
            .ok_or_else(|| GeppettoError::tool_execution(name, format!("tool {name:?} not found")))?;
        handler(args).await
    }

    fn get_tool_descriptions(&self) -> Vec<ToolDescription> {
        self.tools
            .read()
            .map(|tools| tools.values().map(|t| t.description.clone()).collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for MockToolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .tools
            .read()
            .map(|tools| tools.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("MockToolbox").field("tools", &names).finish()
    }
}
