//! Per-turn inference overrides carried on `Turn.Data`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GeppettoError, Result};
use crate::turns::{Turn, KEY_INFERENCE_CONFIG, KEY_OPENAI_INFERENCE_CONFIG};

/// Sampling and reasoning overrides. Set fields win over engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl InferenceConfig {
    /// Overlay `self` (the turn config) on `defaults`.
    pub fn merged_over(&self, defaults: &InferenceConfig) -> InferenceConfig {
        InferenceConfig {
            thinking_budget: self.thinking_budget.or(defaults.thinking_budget),
            reasoning_effort: self
                .reasoning_effort
                .clone()
                .or_else(|| defaults.reasoning_effort.clone()),
            reasoning_summary: self
                .reasoning_summary
                .clone()
                .or_else(|| defaults.reasoning_summary.clone()),
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            max_response_tokens: self.max_response_tokens.or(defaults.max_response_tokens),
            stop: if self.stop.is_empty() {
                defaults.stop.clone()
            } else {
                self.stop.clone()
            },
            seed: self.seed.or(defaults.seed),
        }
    }

    /// Resolve the effective config for `turn`; undecodable turn values are
    /// ignored.
    pub fn resolve(turn: &Turn, defaults: Option<&InferenceConfig>) -> Option<InferenceConfig> {
        let from_turn = KEY_INFERENCE_CONFIG.get(&turn.data).ok().flatten();
        match (from_turn, defaults) {
            (Some(cfg), Some(defaults)) => Some(cfg.merged_over(defaults)),
            (Some(cfg), None) => Some(cfg),
            (None, defaults) => defaults.cloned(),
        }
    }
}

/// OpenAI-specific per-turn options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiInferenceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
}

impl OpenAiInferenceConfig {
    pub fn resolve(turn: &Turn) -> Option<OpenAiInferenceConfig> {
        KEY_OPENAI_INFERENCE_CONFIG.get(&turn.data).ok().flatten()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredOutputMode {
    #[default]
    Off,
    JsonSchema,
}

/// Provider-native structured output via a JSON schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutputConfig {
    #[serde(default)]
    pub mode: StructuredOutputMode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub schema: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
    #[serde(default)]
    pub require_valid: bool,
}

impl StructuredOutputConfig {
    pub fn is_enabled(&self) -> bool {
        self.mode == StructuredOutputMode::JsonSchema
    }

    pub fn strict_or_default(&self) -> bool {
        self.strict.unwrap_or(true)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        if self.name.trim().is_empty() {
            return Err(GeppettoError::validation(
                "structured output mode json_schema requires a non-empty schema name",
            ));
        }
        if self.schema.is_empty() {
            return Err(GeppettoError::validation(
                "structured output mode json_schema requires a non-empty JSON schema",
            ));
        }
        Ok(())
    }
}
