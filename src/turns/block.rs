//! Blocks: the atomic transcript unit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::keys::BlockMetadata;

pub const PAYLOAD_KEY_TEXT: &str = "text";
pub const PAYLOAD_KEY_ID: &str = "id";
pub const PAYLOAD_KEY_NAME: &str = "name";
pub const PAYLOAD_KEY_ARGS: &str = "args";
pub const PAYLOAD_KEY_RESULT: &str = "result";
pub const PAYLOAD_KEY_ERROR: &str = "error";
pub const PAYLOAD_KEY_IMAGES: &str = "images";
pub const PAYLOAD_KEY_ENCRYPTED_CONTENT: &str = "encrypted_content";
pub const PAYLOAD_KEY_ITEM_ID: &str = "item_id";

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";
pub const ROLE_SYSTEM: &str = "system";

/// Block payload: payload key to JSON value.
pub type Payload = Map<String, Value>;

/// Kind of a block. Unknown or missing kinds decode to [`BlockKind::Other`].
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlockKind {
    User,
    LlmText,
    ToolCall,
    ToolUse,
    System,
    Reasoning,
    #[default]
    #[serde(other)]
    Other,
}

impl BlockKind {
    pub const ALL: [BlockKind; 7] = [
        BlockKind::User,
        BlockKind::LlmText,
        BlockKind::ToolCall,
        BlockKind::ToolUse,
        BlockKind::System,
        BlockKind::Reasoning,
        BlockKind::Other,
    ];

    /// Parse a kind string; anything unrecognized maps to `Other`.
    pub fn parse(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|k| k.as_ref() == s)
            .unwrap_or(BlockKind::Other)
    }
}

/// An image attached to a block payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One transcript entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Position within the owning turn; maintained by the turn, not serialized.
    #[serde(skip)]
    pub order: usize,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "BlockMetadata::is_empty")]
    pub metadata: BlockMetadata,
}

impl Block {
    pub fn new(kind: BlockKind) -> Self {
        Self {
            id: new_block_id(),
            kind,
            ..Default::default()
        }
    }

    fn text(kind: BlockKind, role: &str, text: impl Into<String>) -> Self {
        let mut block = Self::new(kind);
        block.role = role.to_string();
        block
            .payload
            .insert(PAYLOAD_KEY_TEXT.into(), Value::String(text.into()));
        block
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::text(BlockKind::User, ROLE_USER, text)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::text(BlockKind::LlmText, ROLE_ASSISTANT, text)
    }

    pub fn system_text(text: impl Into<String>) -> Self {
        Self::text(BlockKind::System, ROLE_SYSTEM, text)
    }

    /// A model-issued tool call.
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        let mut block = Self::new(BlockKind::ToolCall);
        block.payload.insert(PAYLOAD_KEY_ID.into(), Value::String(id.into()));
        block
            .payload
            .insert(PAYLOAD_KEY_NAME.into(), Value::String(name.into()));
        block.payload.insert(PAYLOAD_KEY_ARGS.into(), args);
        block
    }

    /// The result of a tool call, correlated by call id.
    pub fn tool_use(id: impl Into<String>, result: Value) -> Self {
        let mut block = Self::new(BlockKind::ToolUse);
        block.payload.insert(PAYLOAD_KEY_ID.into(), Value::String(id.into()));
        block.payload.insert(PAYLOAD_KEY_RESULT.into(), result);
        block
    }

    /// A provider reasoning item. `id` is the provider-assigned item id.
    pub fn reasoning(id: impl Into<String>, encrypted_content: Option<String>) -> Self {
        let id = id.into();
        let mut block = Self::new(BlockKind::Reasoning);
        if !id.is_empty() {
            block.id = id;
        }
        if let Some(enc) = encrypted_content.filter(|s| !s.is_empty()) {
            block
                .payload
                .insert(PAYLOAD_KEY_ENCRYPTED_CONTENT.into(), Value::String(enc));
        }
        block
    }

    pub fn with_payload(mut self, key: &str, value: Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    /// String payload value, if present and a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn text_content(&self) -> Option<&str> {
        self.payload_str(PAYLOAD_KEY_TEXT)
    }

    /// Correlation id of a tool_call/tool_use block.
    pub fn call_id(&self) -> Option<&str> {
        self.payload_str(PAYLOAD_KEY_ID)
    }

    pub fn images(&self) -> Vec<ImageRef> {
        self.payload
            .get(PAYLOAD_KEY_IMAGES)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Fill in a missing id and the default `assistant` role on `llm_text`.
    pub fn normalize(&mut self) {
        if self.id.is_empty() {
            self.id = new_block_id();
        }
        if self.kind == BlockKind::LlmText && self.role.is_empty() {
            self.role = ROLE_ASSISTANT.to_string();
        }
    }
}

pub(crate) fn new_block_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
