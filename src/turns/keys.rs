//! Typed keys for the Turn.Data, Turn.Metadata and Block.Metadata maps.
//!
//! A key binds a map slot (`"<namespace>.<value>@v<N>"`) to a value type and
//! to one map family. The maps only accept keys of their own family, so raw
//! string indexing and cross-family mixups are rejected at compile time.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GeppettoError, Result};

/// Marker trait for a typed-map family.
pub trait KeyFamily: Send + Sync + 'static {
    /// Human-readable map name used in error messages.
    const MAP_NAME: &'static str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataFamily;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnMetaFamily;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockMetaFamily;

impl KeyFamily for DataFamily {
    const MAP_NAME: &'static str = "Turn.Data";
}

impl KeyFamily for TurnMetaFamily {
    const MAP_NAME: &'static str = "Turn.Metadata";
}

impl KeyFamily for BlockMetaFamily {
    const MAP_NAME: &'static str = "Block.Metadata";
}

/// A typed key for one map family.
pub struct Key<F, T> {
    id: Cow<'static, str>,
    _marker: PhantomData<fn() -> (F, T)>,
}

pub type DataKey<T> = Key<DataFamily, T>;
pub type TurnMetaKey<T> = Key<TurnMetaFamily, T>;
pub type BlockMetaKey<T> = Key<BlockMetaFamily, T>;

impl<F, T> Key<F, T> {
    /// Build a key from a precomputed id such as `"geppetto.usage@v1"`.
    pub const fn from_static(id: &'static str) -> Self {
        Self {
            id: Cow::Borrowed(id),
            _marker: PhantomData,
        }
    }

    /// Build a key from its parts: `<namespace>.<value>@v<version>`.
    pub fn new(namespace: &str, value: &str, version: u16) -> Self {
        Self {
            id: Cow::Owned(format!("{namespace}.{value}@v{version}")),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<F, T> Clone for Key<F, T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<F, T> fmt::Debug for Key<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.id).finish()
    }
}

impl<F, T> fmt::Display for Key<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl<F: KeyFamily, T: Serialize + DeserializeOwned> Key<F, T> {
    /// Read and decode the value stored under this key.
    ///
    /// Absent keys yield `Ok(None)`. A present value that does not decode into
    /// `T` yields a `Validation` error naming the map, key and expected type.
    pub fn get(&self, map: &TypedMap<F>) -> Result<Option<T>> {
        let Some(raw) = map.entries.get(self.id()) else {
            return Ok(None);
        };
        decode_value::<T>(raw).map(Some).map_err(|_| {
            GeppettoError::validation(format!(
                "{}[{:?}]: expected {}, got {}",
                F::MAP_NAME,
                self.id(),
                std::any::type_name::<T>(),
                describe_json(raw),
            ))
        })
    }

    /// Encode and store a value under this key.
    pub fn set(&self, map: &mut TypedMap<F>, value: T) -> Result<()> {
        let encoded = serde_json::to_value(&value).map_err(|err| {
            GeppettoError::validation(format!(
                "{}[{:?}]: value is not serializable: {err}",
                F::MAP_NAME,
                self.id()
            ))
        })?;
        map.entries.insert(self.id().to_string(), encoded);
        Ok(())
    }

    pub fn delete(&self, map: &mut TypedMap<F>) {
        map.entries.remove(self.id());
    }

    pub fn is_set(&self, map: &TypedMap<F>) -> bool {
        map.entries.contains_key(self.id())
    }
}

/// A JSON-valued map that only accepts keys from family `F`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct TypedMap<F> {
    entries: BTreeMap<String, Value>,
    #[serde(skip)]
    _family: PhantomData<F>,
}

pub type TurnData = TypedMap<DataFamily>;
pub type TurnMetadata = TypedMap<TurnMetaFamily>;
pub type BlockMetadata = TypedMap<BlockMetaFamily>;

impl<F> TypedMap<F> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            _family: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key ids currently stored, in sorted order.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Raw JSON view, for serializers and diagnostics only.
    pub fn raw_entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn decode_value<T: DeserializeOwned>(raw: &Value) -> std::result::Result<T, serde_json::Error> {
    match serde_json::from_value::<T>(raw.clone()) {
        Ok(v) => Ok(v),
        Err(first) => {
            let coerced = coerce_integral_floats(raw.clone());
            if &coerced == raw {
                return Err(first);
            }
            serde_json::from_value::<T>(coerced)
        }
    }
}

/// Rewrites floats with no fractional part as integers, recursively. Values
/// re-ingested from generic JSON/YAML often carry `3.0` where `3` is meant.
fn coerce_integral_floats(value: Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Value::from(f as i64)
            }
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_integral_floats).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, coerce_integral_floats(v)))
                .collect(),
        ),
        other => other,
    }
}

fn describe_json(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub const NAMESPACE: &str = "geppetto";

// Turn.Data

pub const KEY_TOOL_REGISTRY: DataKey<Vec<crate::tools::ToolDefinition>> =
    Key::from_static("geppetto.tool_registry@v1");
pub const KEY_TOOL_CONFIG: DataKey<crate::tools::ToolConfig> =
    Key::from_static("geppetto.tool_config@v1");
pub const KEY_AGENT_MODE: DataKey<String> = Key::from_static("geppetto.agent_mode@v1");
pub const KEY_AGENT_MODE_ALLOWED_TOOLS: DataKey<Vec<String>> =
    Key::from_static("geppetto.agent_mode_allowed_tools@v1");
pub const KEY_RESPONSES_SERVER_TOOLS: DataKey<Vec<Value>> =
    Key::from_static("geppetto.responses_server_tools@v1");
pub const KEY_INFERENCE_CONFIG: DataKey<crate::engine::InferenceConfig> =
    Key::from_static("geppetto.inference_config@v1");
pub const KEY_OPENAI_INFERENCE_CONFIG: DataKey<crate::engine::OpenAiInferenceConfig> =
    Key::from_static("geppetto.openai_inference_config@v1");
pub const KEY_STRUCTURED_OUTPUT_CONFIG: DataKey<crate::engine::StructuredOutputConfig> =
    Key::from_static("geppetto.structured_output_config@v1");

// Turn.Metadata

pub const KEY_TURN_META_SESSION_ID: TurnMetaKey<String> =
    Key::from_static("geppetto.session_id@v1");
pub const KEY_TURN_META_INFERENCE_ID: TurnMetaKey<String> =
    Key::from_static("geppetto.inference_id@v1");
pub const KEY_TURN_META_MODEL: TurnMetaKey<String> = Key::from_static("geppetto.model@v1");
pub const KEY_TURN_META_PROVIDER: TurnMetaKey<String> = Key::from_static("geppetto.provider@v1");
pub const KEY_TURN_META_STOP_REASON: TurnMetaKey<String> =
    Key::from_static("geppetto.stop_reason@v1");
pub const KEY_TURN_META_USAGE: TurnMetaKey<crate::events::Usage> =
    Key::from_static("geppetto.usage@v1");
pub const KEY_TURN_META_TRACE_ID: TurnMetaKey<String> = Key::from_static("geppetto.trace_id@v1");

// Block.Metadata

pub const KEY_BLOCK_META_MIDDLEWARE: BlockMetaKey<String> =
    Key::from_static("geppetto.middleware@v1");
pub const KEY_BLOCK_META_CLAUDE_ORIGINAL_CONTENT: BlockMetaKey<Value> =
    Key::from_static("geppetto.claude_original_content@v1");
pub const KEY_BLOCK_META_AGENT_MODE_TAG: BlockMetaKey<String> =
    Key::from_static("geppetto.agentmode_tag@v1");
pub const KEY_BLOCK_META_AGENT_MODE: BlockMetaKey<String> =
    Key::from_static("geppetto.agentmode@v1");

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Limits {
        max: i64,
        label: String,
    }

    const KEY_LIMITS: DataKey<Limits> = Key::from_static("test.limits@v1");
    const KEY_COUNT: DataKey<i64> = Key::from_static("test.count@v1");

    #[test]
    fn key_id_from_parts() {
        let key: TurnMetaKey<String> = Key::new("geppetto", "session_id", 1);
        assert_eq!(key.id(), "geppetto.session_id@v1");
        assert_eq!(key.id(), KEY_TURN_META_SESSION_ID.id());
    }

    #[test]
    fn get_absent_present_and_mismatched() {
        let mut data = TurnData::new();
        assert_eq!(KEY_COUNT.get(&data).unwrap(), None);

        KEY_COUNT.set(&mut data, 7).unwrap();
        assert_eq!(KEY_COUNT.get(&data).unwrap(), Some(7));

        let wrong: DataKey<String> = Key::from_static("test.count@v1");
        let err = wrong.get(&data).unwrap_err();
        assert!(err.to_string().contains("Turn.Data[\"test.count@v1\"]"));
        assert!(err.to_string().contains("expected"));
    }

    #[test]
    fn get_coerces_integral_floats_inside_structs() {
        let data: TurnData =
            serde_json::from_value(serde_json::json!({"test.limits@v1": {"max": 3.0, "label": "x"}}))
                .unwrap();
        let limits = KEY_LIMITS.get(&data).unwrap().unwrap();
        assert_eq!(
            limits,
            Limits {
                max: 3,
                label: "x".into()
            }
        );
    }

    #[test]
    fn fractional_float_is_not_coerced() {
        let data: TurnData =
            serde_json::from_value(serde_json::json!({"test.count@v1": 2.5})).unwrap();
        assert!(KEY_COUNT.get(&data).is_err());
    }

    #[test]
    fn set_rejects_unserializable_values() {
        let mut data = TurnData::new();
        let key: DataKey<std::collections::HashMap<(u8, u8), u8>> =
            Key::from_static("test.tuple_keys@v1");
        let mut value = std::collections::HashMap::new();
        value.insert((1, 2), 3);
        assert!(key.set(&mut data, value).is_err());
        assert!(data.is_empty());
    }

    #[test]
    fn delete_removes_entry() {
        let mut meta = BlockMetadata::new();
        KEY_BLOCK_META_MIDDLEWARE
            .set(&mut meta, "systemprompt".to_string())
            .unwrap();
        assert!(KEY_BLOCK_META_MIDDLEWARE.is_set(&meta));
        KEY_BLOCK_META_MIDDLEWARE.delete(&mut meta);
        assert!(meta.is_empty());
    }
}
