//! Engine settings (layered: code > env > `.env` file).

use std::fmt;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::engine::StructuredOutputConfig;
use crate::error::{GeppettoError, Result};
use crate::security::OutboundUrlOptions;
use crate::tools::config::duration_serde;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Provider endpoint and credentials.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    /// Permit plain `http://` endpoints.
    pub allow_http: bool,
    /// Permit loopback, private, and link-local endpoints.
    pub allow_local_networks: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            allow_http: false,
            allow_local_networks: false,
        }
    }
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("base_url", &self.base_url)
            .field("allow_http", &self.allow_http)
            .field("allow_local_networks", &self.allow_local_networks)
            .finish()
    }
}

impl ApiSettings {
    pub fn url_options(&self) -> OutboundUrlOptions {
        OutboundUrlOptions {
            allow_http: self.allow_http,
            allow_local_networks: self.allow_local_networks,
        }
    }
}

/// Model and sampling settings.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct ChatSettings {
    #[builder(into)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<i64>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[builder(default = true)]
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<StructuredOutputConfig>,
}

fn default_stream() -> bool {
    true
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::builder().model(String::new()).build()
    }
}

/// Reasoning effort level for reasoning models.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Lenient mapping: `low` and `high` are kept, anything else is medium.
    pub fn from_loose(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReasoningSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    /// Summary mode such as `auto` or `detailed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Everything an engine needs to talk to its provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub api: ApiSettings,
    pub chat: ChatSettings,
    pub reasoning: ReasoningSettings,
    /// Outer timeout applied to each inference.
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            chat: ChatSettings::default(),
            reasoning: ReasoningSettings::default(),
            timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }
}

impl EngineSettings {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            chat: ChatSettings::builder().model(model).build(),
            ..Default::default()
        }
    }

    /// Load from environment variables, reading `.env` first if present.
    ///
    /// `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `GEPPETTO_MODEL`,
    /// `GEPPETTO_ALLOW_HTTP`.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut settings = Self::default();
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                settings.api.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            if !url.is_empty() {
                settings.api.base_url = url;
            }
        }
        if let Ok(model) = std::env::var("GEPPETTO_MODEL") {
            settings.chat.model = model;
        }
        if let Ok(flag) = std::env::var("GEPPETTO_ALLOW_HTTP") {
            settings.api.allow_http = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        settings
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api.base_url = url.into();
        self
    }

    /// Allow plain-http and local endpoints, e.g. for mock servers.
    pub fn allow_local_endpoints(mut self) -> Self {
        self.api.allow_http = true;
        self.api.allow_local_networks = true;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.chat.stream = stream;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chat.model.trim().is_empty() {
            return Err(GeppettoError::config("no model configured"));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(GeppettoError::config("no base URL configured"));
        }
        Ok(())
    }
}
