//! YAML self-directive for mode switches.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::turns::{Block, BlockKind};

/// Instructions telling the model how to request a mode switch.
pub fn build_yaml_mode_switch_instructions(current: &str, available: &[String]) -> String {
    let mut out = String::new();
    out.push_str("<modeSwitchGuidelines>");
    out.push_str("Analyze the current conversation and determine if a mode switch would be beneficial. ");
    out.push_str("Consider the user's request, the context, and the available capabilities in different modes. ");
    out.push_str("If a mode switch would improve your ability to help the user, propose it using the following YAML format. ");
    out.push_str("If the current mode is appropriate, do not include the new_mode field.");
    out.push_str("</modeSwitchGuidelines>\n\n");
    out.push_str("```yaml\n");
    out.push_str("mode_switch:\n");
    out.push_str("  analysis: |\n");
    out.push_str("    • What is the user trying to accomplish?\n");
    out.push_str("    • What capabilities are needed?\n");
    out.push_str("    • Is the current mode optimal for this task?\n");
    out.push_str("    • If switching, what specific benefits would the new mode provide?\n");
    out.push_str("  new_mode: MODE_NAME  # Only include this if you recommend switching modes\n");
    out.push_str("```\n\n");
    out.push_str("Current mode: ");
    out.push_str(current);
    if !available.is_empty() {
        out.push_str("\nAvailable modes: ");
        out.push_str(&available.join(", "));
    }
    out.push_str("\n\nRemember: Only propose a mode switch if it would genuinely improve your ability to assist the user. ");
    out.push_str("Staying in the current mode is often the right choice.");
    out
}

/// A `mode_switch` directive found in model output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeSwitch {
    /// Empty when the model only analyzed without switching.
    pub new_mode: String,
    pub analysis: String,
}

#[derive(Deserialize)]
struct Document {
    mode_switch: Option<Directive>,
}

#[derive(Deserialize)]
struct Directive {
    #[serde(default)]
    analysis: Option<String>,
    #[serde(default)]
    new_mode: Option<String>,
}

static YAML_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ims)^[ \t]*```[ \t]*(?:yaml|yml)[ \t]*\r?\n(.*?)^[ \t]*```")
        .expect("yaml fence regex must compile")
});

/// Bodies of the fenced `yaml`/`yml` code blocks in `text`.
pub fn extract_yaml_blocks(text: &str) -> Vec<&str> {
    YAML_FENCE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Scan `llm_text` blocks for a `mode_switch` document.
///
/// The first directive naming a `new_mode` wins. If none does, the first
/// analysis-only directive is returned with an empty `new_mode`.
pub fn detect_yaml_mode_switch<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Option<ModeSwitch> {
    let mut analysis_only: Option<ModeSwitch> = None;
    for block in blocks {
        if block.kind != BlockKind::LlmText {
            continue;
        }
        let Some(text) = block.text_content().filter(|t| !t.is_empty()) else {
            continue;
        };
        for body in extract_yaml_blocks(text) {
            let Ok(Document { mode_switch: Some(directive) }) = serde_yaml::from_str::<Document>(body.trim()) else {
                continue;
            };
            let found = ModeSwitch {
                new_mode: directive.new_mode.unwrap_or_default().trim().to_string(),
                analysis: directive.analysis.unwrap_or_default().trim().to_string(),
            };
            if !found.new_mode.is_empty() {
                return Some(found);
            }
            if analysis_only.is_none() && !found.analysis.is_empty() {
                analysis_only = Some(found);
            }
        }
    }
    analysis_only
}
