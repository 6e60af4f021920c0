//! Responses request construction: sampling settings, input items, tools.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::{EngineSettings, ReasoningEffort};
use crate::engine::{InferenceConfig, OpenAiInferenceConfig, StructuredOutputConfig};
use crate::error::Result;
use crate::tools::{ToolConfig, ToolDefinition};
use crate::turns::{
    Block, BlockKind, Turn, KEY_STRUCTURED_OUTPUT_CONFIG, PAYLOAD_KEY_ARGS,
    PAYLOAD_KEY_ENCRYPTED_CONTENT, PAYLOAD_KEY_ERROR, PAYLOAD_KEY_ID, PAYLOAD_KEY_ITEM_ID,
    PAYLOAD_KEY_NAME, PAYLOAD_KEY_RESULT, PAYLOAD_KEY_TEXT,
};

/// Always requested so reasoning can be replayed statelessly.
pub const INCLUDE_ENCRYPTED_REASONING: &str = "reasoning.encrypted_content";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningParam>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReasoningParam {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextParam {
    pub format: TextFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub schema: Map<String, Value>,
    pub strict: bool,
}

impl From<&StructuredOutputConfig> for TextParam {
    fn from(cfg: &StructuredOutputConfig) -> Self {
        Self {
            format: TextFormat {
                kind: "json_schema".into(),
                name: cfg.name.clone(),
                description: cfg.description.clone(),
                schema: cfg.schema.clone(),
                strict: cfg.strict_or_default(),
            },
        }
    }
}

/// One entry of the request `input` array: either a role-based message or
/// a typed item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InputItem {
    Message(RoleMessage),
    Item(TypedItem),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypedItem {
    Reasoning {
        id: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        encrypted_content: String,
        summary: Vec<Value>,
    },
    Message {
        role: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        id: String,
        content: Vec<ContentPart>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        id: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

/// Model families that reject `temperature`/`top_p`.
pub fn is_reasoning_model(model: &str) -> bool {
    let m = model.to_ascii_lowercase();
    ["o1", "o3", "o4", "gpt-5"]
        .iter()
        .any(|prefix| m.starts_with(prefix))
}

/// Build the request body for `turn`. Tools are attached separately with
/// [`attach_tools`].
pub fn build_request(
    settings: &EngineSettings,
    defaults: Option<&InferenceConfig>,
    turn: &Turn,
) -> Result<ResponsesRequest> {
    let chat = &settings.chat;
    let allow_sampling = !is_reasoning_model(&chat.model);

    let mut req = ResponsesRequest {
        model: chat.model.clone(),
        input: build_input_items(turn),
        max_output_tokens: chat.max_response_tokens,
        temperature: chat.temperature.filter(|_| allow_sampling),
        top_p: chat.top_p.filter(|_| allow_sampling),
        stop: chat.stop.clone(),
        stream: chat.stream,
        include: vec![INCLUDE_ENCRYPTED_REASONING.to_string()],
        ..Default::default()
    };

    if let Some(effort) = settings.reasoning.effort {
        req.reasoning.get_or_insert_with(Default::default).effort = Some(effort);
    }
    if let Some(summary) = settings.reasoning.summary.as_ref().filter(|s| !s.is_empty()) {
        req.reasoning.get_or_insert_with(Default::default).summary = Some(summary.clone());
    }

    if let Some(cfg) = chat.structured_output.as_ref().filter(|c| c.is_enabled()) {
        match cfg.validate() {
            Ok(()) => req.text = Some(cfg.into()),
            Err(err) if cfg.require_valid => return Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring invalid structured output configuration")
            }
        }
    }

    if let Some(inf) = InferenceConfig::resolve(turn, defaults) {
        apply_inference_overrides(&mut req, &inf, allow_sampling);
    }

    if let Some(oai) = OpenAiInferenceConfig::resolve(turn) {
        if oai.store.is_some() {
            req.store = oai.store;
        }
        if oai.service_tier.is_some() {
            req.service_tier = oai.service_tier;
        }
    }

    if let Ok(Some(cfg)) = KEY_STRUCTURED_OUTPUT_CONFIG.get(&turn.data) {
        if cfg.is_enabled() && cfg.validate().is_ok() {
            req.text = Some((&cfg).into());
        }
    }

    Ok(req)
}

fn apply_inference_overrides(req: &mut ResponsesRequest, inf: &InferenceConfig, allow_sampling: bool) {
    if let Some(effort) = &inf.reasoning_effort {
        req.reasoning.get_or_insert_with(Default::default).effort =
            Some(ReasoningEffort::from_loose(effort));
    }
    if let Some(summary) = inf.reasoning_summary.as_ref().filter(|s| !s.is_empty()) {
        req.reasoning.get_or_insert_with(Default::default).summary = Some(summary.clone());
    }
    if let Some(budget) = inf.thinking_budget.filter(|b| *b > 0) {
        req.reasoning.get_or_insert_with(Default::default).max_tokens = Some(budget);
    }
    if allow_sampling {
        if inf.temperature.is_some() {
            req.temperature = inf.temperature;
        }
        if inf.top_p.is_some() {
            req.top_p = inf.top_p;
        }
    }
    if inf.max_response_tokens.is_some() {
        req.max_output_tokens = inf.max_response_tokens;
    }
    if !inf.stop.is_empty() {
        req.stop = inf.stop.clone();
    }
}

/// Advertise function tools (when enabled and non-empty) followed by any
/// provider built-in tools. `tool_choice` is never sent.
pub fn attach_tools(
    req: &mut ResponsesRequest,
    tools: &[ToolDefinition],
    config: &ToolConfig,
    server_tools: Vec<Value>,
) {
    let advertised: Vec<&ToolDefinition> = tools
        .iter()
        .filter(|t| config.is_tool_allowed(&t.name))
        .collect();
    if config.enabled && !advertised.is_empty() {
        req.tools = advertised
            .into_iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        req.parallel_tool_calls = match config.max_parallel_tools {
            0 => None,
            1 => Some(false),
            _ => Some(true),
        };
        tracing::debug!(tool_count = req.tools.len(), "tools attached to request");
    }
    if !server_tools.is_empty() {
        tracing::debug!(count = server_tools.len(), "server-side tools attached to request");
        req.tools.extend(server_tools);
    }
}

fn role_for(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::System => "system",
        BlockKind::User => "user",
        BlockKind::ToolUse => "tool",
        _ => "assistant",
    }
}

fn message_item(block: &Block) -> Option<InputItem> {
    let role = role_for(block.kind);
    let text = block.text_content().filter(|t| !t.trim().is_empty())?;
    let kind = if role == "assistant" {
        "output_text"
    } else {
        "input_text"
    };
    Some(InputItem::Message(RoleMessage {
        role: role.to_string(),
        content: vec![ContentPart {
            kind: kind.into(),
            text: text.to_string(),
        }],
    }))
}

fn function_call_item(block: &Block) -> Option<InputItem> {
    let call_id = block.payload_str(PAYLOAD_KEY_ID).filter(|s| !s.is_empty())?;
    let name = block.payload_str(PAYLOAD_KEY_NAME).filter(|s| !s.is_empty())?;
    let arguments = match block.payload.get(PAYLOAD_KEY_ARGS) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    Some(InputItem::Item(TypedItem::FunctionCall {
        call_id: call_id.to_string(),
        name: name.to_string(),
        arguments,
        id: block.payload_str(PAYLOAD_KEY_ITEM_ID).unwrap_or_default().to_string(),
    }))
}

fn function_call_output_item(block: &Block) -> Option<InputItem> {
    let call_id = block.payload_str(PAYLOAD_KEY_ID).filter(|s| !s.is_empty())?;
    Some(InputItem::Item(TypedItem::FunctionCallOutput {
        call_id: call_id.to_string(),
        output: tool_use_output(block),
    }))
}

fn reasoning_item(block: &Block) -> InputItem {
    InputItem::Item(TypedItem::Reasoning {
        id: block.id.clone(),
        encrypted_content: block
            .payload_str(PAYLOAD_KEY_ENCRYPTED_CONTENT)
            .unwrap_or_default()
            .to_string(),
        summary: Vec::new(),
    })
}

/// Render a tool_use payload as the `output` string. When the payload
/// carries an error the output is `{"error": .., "result": ..}`.
fn tool_use_output(block: &Block) -> String {
    let result = block.payload.get(PAYLOAD_KEY_RESULT);
    let error = block.payload_str(PAYLOAD_KEY_ERROR).filter(|e| !e.is_empty());
    let Some(error) = error else {
        return match result {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
    };
    let mut out = Map::new();
    out.insert("error".into(), Value::String(error.to_string()));
    match result {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) => {
            let parsed = serde_json::from_str::<Value>(s).unwrap_or_else(|_| Value::String(s.clone()));
            out.insert("result".into(), parsed);
        }
        Some(other) => {
            out.insert("result".into(), other.clone());
        }
    }
    Value::Object(out).to_string()
}

fn plain_item(block: &Block) -> Option<InputItem> {
    match block.kind {
        BlockKind::ToolCall => function_call_item(block),
        BlockKind::ToolUse => function_call_output_item(block),
        _ => message_item(block),
    }
}

/// Convert blocks to input items.
///
/// The latest reasoning block is the pivot. Blocks before it become plain
/// items (older reasoning dropped, the last assistant text before the pivot
/// held back). The pivot is emitted only when directly followed by an
/// assistant text (sent as an item-based message) or a run of tool calls
/// and results; otherwise it is omitted. Everything after follows in order.
pub fn build_input_items(turn: &Turn) -> Vec<InputItem> {
    let blocks = &turn.blocks;
    let Some(pivot) = blocks.iter().rposition(|b| b.kind == BlockKind::Reasoning) else {
        return blocks.iter().filter_map(plain_item).collect();
    };

    let mut items = Vec::new();
    let held_back = blocks[..pivot]
        .iter()
        .rposition(|b| b.kind == BlockKind::LlmText);
    for (i, block) in blocks[..pivot].iter().enumerate() {
        if block.kind == BlockKind::Reasoning || Some(i) == held_back {
            continue;
        }
        items.extend(plain_item(block));
    }

    let reasoning = &blocks[pivot];
    let mut rest_start = pivot + 1;
    match blocks.get(pivot + 1) {
        Some(next) if next.kind == BlockKind::LlmText => {
            if let Some(text) = next.text_content().filter(|t| !t.trim().is_empty()) {
                items.push(reasoning_item(reasoning));
                items.push(InputItem::Item(TypedItem::Message {
                    role: "assistant".into(),
                    id: next.payload_str(PAYLOAD_KEY_ITEM_ID).unwrap_or_default().to_string(),
                    content: vec![ContentPart {
                        kind: "output_text".into(),
                        text: text.to_string(),
                    }],
                }));
                rest_start = pivot + 2;
            }
        }
        Some(next) if next.kind == BlockKind::ToolCall => {
            items.push(reasoning_item(reasoning));
            let mut j = pivot + 1;
            while let Some(block) = blocks.get(j) {
                match block.kind {
                    BlockKind::ToolCall | BlockKind::ToolUse => items.extend(plain_item(block)),
                    _ => break,
                }
                j += 1;
            }
            rest_start = j;
        }
        _ => {}
    }

    for block in &blocks[rest_start..] {
        if block.kind == BlockKind::Reasoning {
            continue;
        }
        items.extend(plain_item(block));
    }
    items
}
