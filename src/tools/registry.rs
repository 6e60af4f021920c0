//! Tool registries: the set of tools advertised to the model.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::definition::ToolDefinition;
use crate::error::{GeppettoError, Result};

/// Registration happens before use; reads may be concurrent.
pub trait ToolRegistry: Send + Sync {
    fn register_tool(&self, name: &str, definition: ToolDefinition) -> Result<()>;
    fn get_tool(&self, name: &str) -> Option<ToolDefinition>;
    /// All tools, sorted by name.
    fn list_tools(&self) -> Vec<ToolDefinition>;
    fn unregister_tool(&self, name: &str) -> Result<()>;

    fn has_tool(&self, name: &str) -> bool {
        self.get_tool(name).is_some()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryToolRegistry {
    tools: RwLock<BTreeMap<String, ToolDefinition>>,
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated from definitions, keyed by their own names.
    pub fn from_definitions(defs: impl IntoIterator<Item = ToolDefinition>) -> Result<Self> {
        let registry = Self::new();
        for def in defs {
            let name = def.name.clone();
            registry.register_tool(&name, def)?;
        }
        Ok(registry)
    }

    fn poisoned() -> GeppettoError {
        GeppettoError::validation("tool registry lock poisoned")
    }
}

impl ToolRegistry for InMemoryToolRegistry {
    fn register_tool(&self, name: &str, mut definition: ToolDefinition) -> Result<()> {
        if name.is_empty() {
            return Err(GeppettoError::validation("tool name cannot be empty"));
        }
        if !definition.name.is_empty() && definition.name != name {
            return Err(GeppettoError::validation(format!(
                "tool definition name ({}) does not match registry name ({name})",
                definition.name
            )));
        }
        definition.name = name.to_string();
        let mut tools = self.tools.write().map_err(|_| Self::poisoned())?;
        tools.insert(name.to_string(), definition);
        Ok(())
    }

    fn get_tool(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.read().ok()?.get(name).cloned()
    }

    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .map(|tools| tools.values().cloned().collect())
            .unwrap_or_default()
    }

    fn unregister_tool(&self, name: &str) -> Result<()> {
        let mut tools = self.tools.write().map_err(|_| Self::poisoned())?;
        tools
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| GeppettoError::validation(format!("tool not found: {name}")))
    }
}
