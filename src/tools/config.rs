//! Engine-level tool configuration stored on `Turn.Data`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::definition::ToolDefinition;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolErrorHandling {
    /// Record the error in the tool result and keep going.
    #[default]
    Continue,
    /// Stop the tool loop on the first error.
    Abort,
    /// Retry with exponential backoff before recording the error.
    Retry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "duration_serde")]
    pub backoff_base: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        self.backoff_base.mul_f64(factor)
    }
}

/// How tools are advertised and executed for a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub enabled: bool,
    pub tool_choice: ToolChoice,
    pub max_iterations: usize,
    #[serde(with = "duration_serde")]
    pub execution_timeout: Duration,
    pub max_parallel_tools: usize,
    /// `None` allows every tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    pub tool_error_handling: ToolErrorHandling,
    pub retry_config: RetryConfig,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tool_choice: ToolChoice::Auto,
            max_iterations: 5,
            execution_timeout: Duration::from_secs(30),
            max_parallel_tools: 3,
            allowed_tools: None,
            tool_error_handling: ToolErrorHandling::Continue,
            retry_config: RetryConfig::default(),
        }
    }
}

impl ToolConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_max_parallel_tools(mut self, max_parallel: usize) -> Self {
        self.max_parallel_tools = max_parallel;
        self
    }

    pub fn with_allowed_tools(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_tools = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_tool_error_handling(mut self, handling: ToolErrorHandling) -> Self {
        self.tool_error_handling = handling;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry_config = retry;
        self
    }

    pub fn is_tool_allowed(&self, name: &str) -> bool {
        match &self.allowed_tools {
            None => true,
            Some(allowed) => allowed.iter().any(|a| a == name),
        }
    }

    pub fn filter_tools(&self, tools: Vec<ToolDefinition>) -> Vec<ToolDefinition> {
        tools
            .into_iter()
            .filter(|t| self.is_tool_allowed(&t.name))
            .collect()
    }
}

/// Durations as `"30s"`/`"250ms"`/`"1m30s"` strings or plain seconds.
pub mod duration_serde {
    use std::time::Duration;

    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        d.deserialize_any(DurationVisitor)
    }

    pub fn format_duration(d: Duration) -> String {
        let ms = d.as_millis();
        if ms % 1000 == 0 {
            format!("{}s", ms / 1000)
        } else {
            format!("{ms}ms")
        }
    }

    /// Parse a sequence of `<number><unit>` segments; units are h, m, s, ms.
    pub fn parse_duration(input: &str) -> Option<Duration> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        if let Ok(secs) = input.parse::<f64>() {
            return (secs >= 0.0).then(|| Duration::from_secs_f64(secs));
        }
        let mut total = Duration::ZERO;
        let mut rest = input;
        while !rest.is_empty() {
            let digits = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            if digits == 0 {
                return None;
            }
            let value: f64 = rest[..digits].parse().ok()?;
            rest = &rest[digits..];
            let unit_len = rest
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            rest = &rest[unit_len..];
            let secs = match unit {
                "h" => value * 3600.0,
                "m" => value * 60.0,
                "s" => value,
                "ms" => value / 1000.0,
                _ => return None,
            };
            total += Duration::from_secs_f64(secs);
        }
        Some(total)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a duration string like \"30s\" or a number of seconds")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            parse_duration(v).ok_or_else(|| E::custom(format!("invalid duration {v:?}")))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("negative duration"))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
            if v < 0.0 || !v.is_finite() {
                return Err(E::custom("invalid duration"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }
}
