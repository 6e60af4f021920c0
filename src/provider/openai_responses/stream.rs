//! Streaming state machine for Responses SSE events.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::{Map, Value};

use crate::context::InferenceContext;
use crate::error::{GeppettoError, Result};
use crate::events::{publish_event_to_context, Event, EventMetadata, EventPayload, ToolCall, Usage};
use crate::turns::{Block, Turn, PAYLOAD_KEY_ITEM_ID};

/// Token totals parsed from a `usage` object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cached_tokens: i64,
    pub reasoning_tokens: i64,
}

impl UsageTotals {
    pub fn usage(&self) -> Option<Usage> {
        let usage = Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cached_tokens: self.cached_tokens,
        };
        (!usage.is_empty()).then_some(usage)
    }
}

/// Convert a JSON number to an integer, rejecting values outside `i64`.
pub fn to_int(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    if n.is_u64() {
        return None;
    }
    let f = n.as_f64()?;
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
    if !f.is_finite() || f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return None;
    }
    Some(f as i64)
}

pub fn parse_usage_totals(usage: &Map<String, Value>) -> UsageTotals {
    let field = |obj: &Map<String, Value>, key: &str| obj.get(key).and_then(to_int);
    let mut totals = UsageTotals::default();
    if let Some(v) = field(usage, "input_tokens") {
        totals.input_tokens = v;
    }
    if let Some(v) = field(usage, "output_tokens") {
        totals.output_tokens = v;
    }
    let cached = match usage.get("input_tokens_details").and_then(Value::as_object) {
        Some(details) => field(details, "cached_tokens"),
        None => field(usage, "cached_tokens"),
    };
    if let Some(v) = cached {
        totals.cached_tokens = v;
    }
    let reasoning = match usage.get("output_tokens_details").and_then(Value::as_object) {
        Some(details) => field(details, "reasoning_tokens"),
        None => field(usage, "reasoning_tokens"),
    };
    if let Some(v) = reasoning {
        totals.reasoning_tokens = v;
    }
    totals
}

/// Usage from `envelope.usage` or `envelope.response.usage`.
pub fn parse_usage_from_envelope(envelope: &Value) -> Option<UsageTotals> {
    let usage = envelope.get("usage").and_then(Value::as_object).or_else(|| {
        envelope
            .get("response")
            .and_then(|r| r.get("usage"))
            .and_then(Value::as_object)
    })?;
    Some(parse_usage_totals(usage))
}

/// Mask a secret, keeping a short prefix and suffix.
pub fn redact_string(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let prefix: String = chars[..6].iter().collect();
    let suffix: String = chars[chars.len() - 6..].iter().collect();
    format!("{prefix}-****-{suffix}")
}

/// Copy of `value` with every string `encrypted_content` field masked.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| match (k.as_str(), v) {
                    ("encrypted_content", Value::String(s)) => (k.clone(), Value::String(redact_string(s))),
                    _ => (k.clone(), redact(v)),
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// String chunks pass through; anything else is rendered as JSON.
fn chunk_from_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
struct PendingCall {
    call_id: String,
    name: String,
    item_id: String,
    args: String,
}

/// Accumulated state of one streaming response.
#[derive(Debug)]
pub struct ResponsesStream {
    pub metadata: EventMetadata,
    message: String,
    think_buf: String,
    /// Offset in `think_buf` where the current reasoning item starts.
    think_item_start: usize,
    say_buf: String,
    summary_buf: String,
    calls_by_item: HashMap<String, PendingCall>,
    final_calls: Vec<PendingCall>,
    latest_encrypted_content: String,
    latest_message_item_id: String,
    usage: UsageTotals,
    stop_reason: Option<String>,
    stream_err: Option<GeppettoError>,
    error_published: bool,
    started: Instant,
}

impl ResponsesStream {
    pub fn new(metadata: EventMetadata) -> Self {
        Self {
            metadata,
            message: String::new(),
            think_buf: String::new(),
            think_item_start: 0,
            say_buf: String::new(),
            summary_buf: String::new(),
            calls_by_item: HashMap::new(),
            final_calls: Vec::new(),
            latest_encrypted_content: String::new(),
            latest_message_item_id: String::new(),
            usage: UsageTotals::default(),
            stop_reason: None,
            stream_err: None,
            error_published: false,
            started: Instant::now(),
        }
    }

    /// Assistant text accumulated so far.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn thinking_text(&self) -> &str {
        &self.think_buf
    }

    /// Whether an Error event has already been published for this response.
    pub fn error_published(&self) -> bool {
        self.error_published
    }

    pub fn elapsed_ms(&self) -> i64 {
        i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    fn publish(&self, ctx: &InferenceContext, payload: EventPayload) {
        publish_event_to_context(ctx, &Event::new(&self.metadata, payload));
    }

    fn info(&self, ctx: &InferenceContext, message: &str) {
        publish_event_to_context(ctx, &Event::info(&self.metadata, message, Map::new()));
    }

    fn append_assistant_chunk(&mut self, ctx: &InferenceContext, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.message.push_str(chunk);
        self.say_buf.push_str(chunk);
        publish_event_to_context(ctx, &Event::partial(&self.metadata, chunk, &self.message));
    }

    /// Record a provider error. Only the first one is published.
    fn fail(&mut self, ctx: &InferenceContext, err: GeppettoError) {
        if !self.error_published {
            publish_event_to_context(ctx, &Event::error(&self.metadata, &err));
            self.error_published = true;
        }
        self.stream_err.get_or_insert(err);
    }

    /// Apply one decoded SSE event.
    pub fn handle_event(&mut self, ctx: &InferenceContext, turn: &mut Turn, name: &str, data: &Value) {
        match name {
            "response.output_item.added" => self.on_item_added(ctx, data),
            "response.web_search_call.in_progress" => self.publish(
                ctx,
                EventPayload::WebSearchStarted {
                    item_id: str_field(data, "item_id").to_string(),
                    query: String::new(),
                },
            ),
            "response.web_search_call.searching" => self.publish(
                ctx,
                EventPayload::WebSearchSearching {
                    item_id: str_field(data, "item_id").to_string(),
                },
            ),
            "response.web_search_call.completed" => self.publish(
                ctx,
                EventPayload::WebSearchDone {
                    item_id: str_field(data, "item_id").to_string(),
                },
            ),
            "error" => {
                let err = provider_error("responses stream error", data.get("error"));
                self.fail(ctx, err);
                if let Some(tap) = ctx.debug_tap() {
                    tap.on_provider_object("stream.error", data);
                }
            }
            "response.failed" => {
                let err = provider_error(
                    "responses failed",
                    data.get("response").and_then(|r| r.get("error")),
                );
                self.fail(ctx, err);
                if let Some(tap) = ctx.debug_tap() {
                    tap.on_provider_object("response.failed", data);
                }
            }
            "response.reasoning_summary_part.added" => self.info(ctx, "reasoning-summary-started"),
            "response.reasoning_summary_part.done" => self.info(ctx, "reasoning-summary-ended"),
            "response.reasoning_summary_text.delta" => {
                let delta = delta_or_text(data);
                if !delta.is_empty() {
                    self.summary_buf.push_str(delta);
                    publish_event_to_context(
                        ctx,
                        &Event::thinking_partial(&self.metadata, delta, &self.summary_buf),
                    );
                }
            }
            "response.reasoning_text.delta" => {
                let delta = delta_or_text(data);
                if !delta.is_empty() {
                    self.think_buf.push_str(delta);
                    publish_event_to_context(ctx, &Event::reasoning_text_delta(&self.metadata, delta));
                    publish_event_to_context(
                        ctx,
                        &Event::thinking_partial(&self.metadata, delta, &self.think_buf),
                    );
                }
            }
            "response.reasoning_text.done" => {
                // Done may replay deltas already streamed for this item.
                let text = str_field(data, "text");
                let streamed = &self.think_buf[self.think_item_start..];
                if let Some(rest) = text.strip_prefix(streamed) {
                    self.think_buf.push_str(rest);
                } else if !self.think_buf.ends_with(text) {
                    self.think_buf.push_str(text);
                }
                self.think_item_start = self.think_buf.len();
                publish_event_to_context(ctx, &Event::reasoning_text_done(&self.metadata, &self.think_buf));
            }
            "response.output_item.done" => self.on_item_done(ctx, turn, data),
            "response.output_text.delta" => {
                let delta = match data.get("delta") {
                    Some(Value::String(s)) => s.as_str(),
                    _ => data
                        .get("text")
                        .and_then(|t| t.get("delta"))
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                };
                let delta = delta.to_string();
                self.append_assistant_chunk(ctx, &delta);
            }
            "response.output_json.delta" => {
                let delta = str_field(data, "delta").to_string();
                self.append_assistant_chunk(ctx, &delta);
            }
            "response.output_json.done" => {
                if let Some(json) = data.get("json") {
                    let chunk = chunk_from_value(json);
                    if !chunk.is_empty() && !self.message.ends_with(&chunk) {
                        self.append_assistant_chunk(ctx, &chunk);
                    }
                }
            }
            "response.output_text.annotation.added" => {
                if let Some(ann) = data.get("annotation") {
                    self.publish(
                        ctx,
                        EventPayload::Citation {
                            title: str_field(ann, "title").to_string(),
                            url: str_field(ann, "url").to_string(),
                            start_index: ann.get("start_index").and_then(to_int),
                            end_index: ann.get("end_index").and_then(to_int),
                            output_index: data.get("output_index").and_then(to_int),
                            content_index: data.get("content_index").and_then(to_int),
                            annotation_index: data.get("annotation_index").and_then(to_int),
                        },
                    );
                }
            }
            "response.function_call_arguments.delta" => {
                let item_id = str_field(data, "item_id");
                if !item_id.is_empty() {
                    let pending = self
                        .calls_by_item
                        .entry(item_id.to_string())
                        .or_insert_with(|| PendingCall {
                            item_id: item_id.to_string(),
                            ..Default::default()
                        });
                    pending.args.push_str(str_field(data, "delta"));
                }
            }
            "response.function_call_arguments.done" => {
                let args = str_field(data, "arguments");
                if !args.is_empty() {
                    if let Some(pending) = self.calls_by_item.get_mut(str_field(data, "item_id")) {
                        pending.args = args.to_string();
                    }
                }
            }
            "response.completed" => {
                if let Some(totals) = parse_usage_from_envelope(data) {
                    self.usage = totals;
                    tracing::debug!(
                        input_tokens = totals.input_tokens,
                        output_tokens = totals.output_tokens,
                        cached_tokens = totals.cached_tokens,
                        reasoning_tokens = totals.reasoning_tokens,
                        "usage parsed"
                    );
                }
                let stop = match str_field(data, "stop_reason") {
                    "" => data.get("response").map(|r| str_field(r, "stop_reason")).unwrap_or_default(),
                    s => s,
                };
                if !stop.is_empty() {
                    self.stop_reason = Some(stop.to_string());
                }
                if let Some(tap) = ctx.debug_tap() {
                    tap.on_provider_object("response.completed", data);
                }
            }
            other => tracing::trace!(event = other, "unhandled responses event"),
        }
    }

    fn on_item_added(&mut self, ctx: &InferenceContext, data: &Value) {
        let Some(item) = data.get("item") else {
            return;
        };
        match str_field(item, "type") {
            "reasoning" => {
                self.info(ctx, "thinking-started");
                self.think_item_start = self.think_buf.len();
                let enc = str_field(item, "encrypted_content");
                if !enc.is_empty() {
                    self.latest_encrypted_content = enc.to_string();
                }
            }
            "message" => {
                self.info(ctx, "output-started");
                let id = str_field(item, "id");
                if !id.is_empty() {
                    self.latest_message_item_id = id.to_string();
                }
            }
            "web_search_call" => {
                let item_id = str_field(item, "id").to_string();
                let Some(action) = item.get("action") else {
                    return;
                };
                match str_field(action, "type") {
                    "search" => self.publish(
                        ctx,
                        EventPayload::WebSearchStarted {
                            item_id,
                            query: str_field(action, "query").to_string(),
                        },
                    ),
                    "open_page" => self.publish(
                        ctx,
                        EventPayload::WebSearchOpenPage {
                            item_id,
                            url: str_field(action, "url").to_string(),
                        },
                    ),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn on_item_done(&mut self, ctx: &InferenceContext, turn: &mut Turn, data: &Value) {
        let Some(item) = data.get("item") else {
            return;
        };
        match str_field(item, "type") {
            "reasoning" => {
                self.info(ctx, "thinking-ended");
                let enc = match str_field(item, "encrypted_content") {
                    "" => self.latest_encrypted_content.clone(),
                    enc => enc.to_string(),
                };
                turn.append_block(Block::reasoning(str_field(item, "id"), Some(enc)));
                if let Some(tap) = ctx.debug_tap() {
                    tap.on_provider_object("output.reasoning", item);
                }
            }
            "message" => {
                self.info(ctx, "output-ended");
                let id = str_field(item, "id");
                if !id.is_empty() {
                    self.latest_message_item_id = id.to_string();
                }
                let parts = item.get("content").and_then(Value::as_array);
                for part in parts.into_iter().flatten() {
                    let chunk = match str_field(part, "type") {
                        "output_text" | "text" => str_field(part, "text").to_string(),
                        "output_json" => part.get("json").map(chunk_from_value).unwrap_or_default(),
                        _ => continue,
                    };
                    // Text already streamed through deltas is not appended again.
                    if !chunk.is_empty() && !self.message.ends_with(&chunk) {
                        self.append_assistant_chunk(ctx, &chunk);
                    }
                }
                if let Some(tap) = ctx.debug_tap() {
                    tap.on_provider_object("output.message", item);
                }
            }
            "function_call" => {
                let call_id = str_field(item, "call_id");
                let name = str_field(item, "name");
                let item_id = str_field(item, "id");
                let args = match str_field(item, "arguments") {
                    "" => self
                        .calls_by_item
                        .get(item_id)
                        .map(|p| p.args.clone())
                        .unwrap_or_default(),
                    args => args.to_string(),
                };
                if call_id.is_empty() || name.is_empty() {
                    tracing::debug!(item_id, "function_call item without call_id or name");
                    return;
                }
                publish_event_to_context(
                    ctx,
                    &Event::tool_call(
                        &self.metadata,
                        ToolCall {
                            id: call_id.to_string(),
                            name: name.to_string(),
                            input: args.clone(),
                        },
                    ),
                );
                self.final_calls.push(PendingCall {
                    call_id: call_id.to_string(),
                    name: name.to_string(),
                    item_id: item_id.to_string(),
                    args,
                });
            }
            "web_search_call" => {
                let query = item
                    .get("action")
                    .map(|a| str_field(a, "query"))
                    .unwrap_or_default();
                if !query.is_empty() {
                    tracing::debug!(query, item_id = str_field(item, "id"), "web search completed");
                }
            }
            _ => {}
        }
    }

    /// Close out the response: fill metadata, append the assistant and
    /// tool_call blocks, and emit Final. Returns the final metadata, or the
    /// stream error when the provider reported one.
    pub fn finish(mut self, ctx: &InferenceContext, turn: &mut Turn) -> Result<EventMetadata> {
        if let Some(usage) = self.usage.usage() {
            self.metadata.usage = Some(usage);
        }
        let extra = &mut self.metadata.extra;
        if self.usage.reasoning_tokens > 0 {
            extra.insert("reasoning_tokens".into(), self.usage.reasoning_tokens.into());
        }
        extra.insert("thinking_text".into(), Value::String(self.think_buf.clone()));
        extra.insert("saying_text".into(), Value::String(self.say_buf.clone()));
        if !self.summary_buf.is_empty() {
            extra.insert(
                "reasoning_summary_text".into(),
                Value::String(self.summary_buf.clone()),
            );
            let mut data = Map::new();
            data.insert("text".into(), Value::String(self.summary_buf.clone()));
            publish_event_to_context(ctx, &Event::info(&self.metadata, "reasoning-summary", data));
        }
        if self.stop_reason.is_some() {
            self.metadata.stop_reason = self.stop_reason.clone();
        }
        self.metadata.duration_ms = Some(self.elapsed_ms());

        if let Some(err) = self.stream_err.take() {
            tracing::debug!(error = %err, "stream ended with provider error");
            return Err(err);
        }

        if !self.message.trim().is_empty() {
            let mut block = Block::assistant_text(self.message.clone());
            if !self.latest_message_item_id.is_empty() {
                block = block.with_payload(
                    PAYLOAD_KEY_ITEM_ID,
                    Value::String(self.latest_message_item_id.clone()),
                );
            }
            turn.append_block(block);
        }
        for call in &self.final_calls {
            turn.append_block(tool_call_block(&call.call_id, &call.name, &call.args, &call.item_id));
        }
        publish_event_to_context(ctx, &Event::final_text(&self.metadata, &self.message));
        Ok(self.metadata)
    }
}

/// Build a tool_call block from raw argument text; invalid JSON becomes an
/// empty object.
pub fn tool_call_block(call_id: &str, name: &str, args: &str, item_id: &str) -> Block {
    let parsed = match serde_json::from_str::<Value>(args) {
        Ok(value) => value,
        Err(err) => {
            if !args.is_empty() {
                tracing::warn!(call_id, name, error = %err, "invalid tool call arguments; using {{}}");
            }
            Value::Object(Map::new())
        }
    };
    let mut block = Block::tool_call(call_id, name, parsed);
    if !item_id.is_empty() {
        block = block.with_payload(PAYLOAD_KEY_ITEM_ID, Value::String(item_id.to_string()));
    }
    block
}

fn delta_or_text(data: &Value) -> &str {
    match str_field(data, "delta") {
        "" => str_field(data, "text"),
        delta => delta,
    }
}

fn provider_error(prefix: &str, error: Option<&Value>) -> GeppettoError {
    let Some(error) = error.filter(|e| e.is_object()) else {
        return GeppettoError::provider(prefix, None, prefix);
    };
    let code = Some(str_field(error, "code"))
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    let message = match str_field(error, "message") {
        "" => prefix,
        m => m,
    };
    GeppettoError::provider(prefix, code, message)
}
