//! Mode catalog and transition store.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GeppettoError, Result};

/// A named profile: which tools are allowed and a system prompt snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
}

impl AgentMode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_allowed_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

/// A recorded mode transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChange {
    pub run_id: String,
    pub turn_id: String,
    pub from_mode: String,
    pub to_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub analysis: String,
    pub at: DateTime<Utc>,
}

impl ModeChange {
    /// A change stamped with the current time.
    pub fn new(
        run_id: impl Into<String>,
        turn_id: impl Into<String>,
        from_mode: impl Into<String>,
        to_mode: impl Into<String>,
        analysis: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            turn_id: turn_id.into(),
            from_mode: from_mode.into(),
            to_mode: to_mode.into(),
            analysis: analysis.into(),
            at: Utc::now(),
        }
    }
}

/// Resolves modes by name and remembers the current mode per run.
#[async_trait]
pub trait AgentModeService: Send + Sync {
    /// Look up a mode. Unknown names are a `Validation` error.
    async fn get_mode(&self, name: &str) -> Result<AgentMode>;

    /// The last mode recorded for `run_id`, if any.
    async fn get_current_mode(&self, run_id: &str) -> Result<Option<String>>;

    async fn record_mode_change(&self, change: ModeChange) -> Result<()>;

    /// Names of every known mode, sorted. Used in switch instructions.
    fn mode_names(&self) -> Vec<String> {
        Vec::new()
    }
}

pub(crate) fn unknown_mode(name: &str) -> GeppettoError {
    GeppettoError::validation(format!("unknown agent mode: {name:?}"))
}

/// In-memory service over a fixed mode catalog.
#[derive(Debug, Default)]
pub struct StaticService {
    /// Keyed by lowercase name.
    modes: BTreeMap<String, AgentMode>,
    current: RwLock<HashMap<String, String>>,
    history: RwLock<Vec<ModeChange>>,
}

impl StaticService {
    pub fn new(modes: impl IntoIterator<Item = AgentMode>) -> Self {
        let modes = modes
            .into_iter()
            .filter(|m| !m.name.is_empty())
            .map(|m| (m.name.to_lowercase(), m))
            .collect();
        Self {
            modes,
            ..Default::default()
        }
    }

    /// Recorded transitions for one run, oldest first.
    pub fn changes(&self, run_id: &str) -> Vec<ModeChange> {
        self.history
            .read()
            .map(|h| h.iter().filter(|c| c.run_id == run_id).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AgentModeService for StaticService {
    async fn get_mode(&self, name: &str) -> Result<AgentMode> {
        if name.is_empty() {
            return Err(unknown_mode(name));
        }
        self.modes
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| unknown_mode(name))
    }

    async fn get_current_mode(&self, run_id: &str) -> Result<Option<String>> {
        let current = self
            .current
            .read()
            .map_err(|_| GeppettoError::validation("agent mode store lock poisoned"))?;
        Ok(current.get(run_id).cloned())
    }

    async fn record_mode_change(&self, change: ModeChange) -> Result<()> {
        {
            let mut current = self
                .current
                .write()
                .map_err(|_| GeppettoError::validation("agent mode store lock poisoned"))?;
            current.insert(change.run_id.clone(), change.to_mode.clone());
        }
        let mut history = self
            .history
            .write()
            .map_err(|_| GeppettoError::validation("agent mode store lock poisoned"))?;
        history.push(change);
        Ok(())
    }

    fn mode_names(&self) -> Vec<String> {
        self.modes.values().map(|m| m.name.clone()).collect()
    }
}
