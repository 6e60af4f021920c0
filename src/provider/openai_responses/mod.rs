//! OpenAI Responses engine: request building, SSE streaming, and the
//! non-streaming fallback.

pub mod request;
pub mod stream;

pub use request::{build_input_items, build_request, InputItem, ResponsesRequest, TypedItem};
pub use stream::ResponsesStream;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use super::http::{request_headers, shared_client, sse_frames, status_to_error};
use crate::config::EngineSettings;
use crate::context::InferenceContext;
use crate::engine::{Engine, HttpExchange, InferenceConfig};
use crate::error::Result;
use crate::events::{publish_event_to_context, Event, EventMetadata, ToolCall};
use crate::security::validate_outbound_url;
use crate::tools::ToolConfig;
use crate::turns::{
    to_yaml, Block, Turn, KEY_RESPONSES_SERVER_TOOLS, KEY_TOOL_CONFIG, KEY_TOOL_REGISTRY,
    KEY_TURN_META_INFERENCE_ID, KEY_TURN_META_MODEL, KEY_TURN_META_PROVIDER,
    KEY_TURN_META_SESSION_ID, KEY_TURN_META_STOP_REASON, KEY_TURN_META_USAGE, PAYLOAD_KEY_ITEM_ID,
};

pub const PROVIDER_NAME: &str = "openai-responses";

/// Engine for the OpenAI Responses API.
#[derive(Debug, Clone)]
pub struct ResponsesEngine {
    settings: EngineSettings,
    client: reqwest::Client,
    inference_defaults: Option<InferenceConfig>,
}

impl ResponsesEngine {
    pub fn new(settings: EngineSettings) -> Result<Self> {
        Self::with_client(settings, shared_client().clone())
    }

    /// Use a caller-supplied HTTP client.
    pub fn with_client(settings: EngineSettings, client: reqwest::Client) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            client,
            inference_defaults: None,
        })
    }

    /// Engine-level inference defaults; per-turn values still win.
    pub fn with_inference_defaults(mut self, defaults: InferenceConfig) -> Self {
        self.inference_defaults = Some(defaults);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn endpoint(&self) -> Result<String> {
        let url = format!("{}/responses", self.settings.api.base_url.trim_end_matches('/'));
        validate_outbound_url(&url, self.settings.api.url_options())?;
        Ok(url)
    }

    /// Build the full request for `turn`, tools included.
    pub fn build_request(&self, ctx: &InferenceContext, turn: &Turn) -> Result<ResponsesRequest> {
        let mut req = build_request(&self.settings, self.inference_defaults.as_ref(), turn)?;

        let tools = match ctx.tool_registry() {
            Some(registry) => registry.list_tools(),
            None => KEY_TOOL_REGISTRY.get(&turn.data)?.unwrap_or_default(),
        };
        let tool_config = KEY_TOOL_CONFIG.get(&turn.data)?.unwrap_or_else(ToolConfig::default);
        let server_tools = KEY_RESPONSES_SERVER_TOOLS.get(&turn.data)?.unwrap_or_default();
        request::attach_tools(&mut req, &tools, &tool_config, server_tools);
        Ok(req)
    }

    fn metadata_for(&self, turn: &Turn, req: &ResponsesRequest) -> EventMetadata {
        let mut meta = EventMetadata::for_inference();
        meta.model = Some(req.model.clone());
        meta.temperature = req.temperature;
        meta.top_p = req.top_p;
        meta.max_tokens = req.max_output_tokens;
        meta.session_id = KEY_TURN_META_SESSION_ID.get(&turn.metadata).ok().flatten();
        meta.inference_id = KEY_TURN_META_INFERENCE_ID.get(&turn.metadata).ok().flatten();
        meta.turn_id = Some(turn.id.clone()).filter(|id| !id.is_empty());
        meta
    }

    async fn send(&self, ctx: &InferenceContext, url: &str, body: Vec<u8>, sse: bool) -> Result<reqwest::Response> {
        let headers = request_headers(self.settings.api.api_key.as_deref(), sse);
        let tap = ctx.debug_tap();
        if let Some(tap) = tap {
            tap.on_http(&HttpExchange::request("POST", url, &headers), &body);
        }
        let resp = match self.client.post(url).headers(headers).body(body).send().await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::debug!(error = %err, "responses HTTP request failed");
                if let Some(tap) = tap {
                    tap.on_provider_object("http.error", &json!({"error": err.to_string()}));
                }
                return Err(err.into());
            }
        };
        let status = resp.status().as_u16();
        tracing::debug!(
            status,
            content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default(),
            "responses HTTP response received"
        );
        if !resp.status().is_success() {
            let headers = resp.headers().clone();
            let text = resp.text().await.unwrap_or_default();
            if let Some(tap) = tap {
                tap.on_http_response(&HttpExchange::response(status, &headers), text.as_bytes());
            }
            return Err(status_to_error(status, &text));
        }
        Ok(resp)
    }

    async fn run_streaming(
        &self,
        ctx: &InferenceContext,
        turn: &mut Turn,
        state: &mut ResponsesStream,
        url: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        let resp = self.send(ctx, url, body, true).await?;
        if let Some(tap) = ctx.debug_tap() {
            tap.on_http_response(&HttpExchange::response(resp.status().as_u16(), resp.headers()), &[]);
        }
        let frames = sse_frames(resp);
        futures::pin_mut!(frames);
        while let Some(frame) = frames.next().await {
            let frame = frame?;
            if let Some(tap) = ctx.debug_tap() {
                tap.on_sse(&frame.event, frame.data.as_bytes());
            }
            let data: Value = match serde_json::from_str(&frame.data) {
                Ok(data) => data,
                Err(err) => {
                    tracing::debug!(event = %frame.event, raw_len = frame.data.len(), error = %err, "failed to decode SSE data");
                    continue;
                }
            };
            let name = if frame.event.is_empty() {
                data.get("type").and_then(Value::as_str).unwrap_or_default().to_string()
            } else {
                frame.event
            };
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!(event = %name, data = %stream::redact(&data), "SSE event");
            }
            state.handle_event(ctx, turn, &name, &data);
        }
        tracing::debug!("SSE loop ended");
        Ok(())
    }

    async fn run_blocking(
        &self,
        ctx: &InferenceContext,
        turn: &mut Turn,
        state: &mut ResponsesStream,
        url: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        let resp = self.send(ctx, url, body, false).await?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let raw = resp.bytes().await?;
        if let Some(tap) = ctx.debug_tap() {
            tap.on_http_response(&HttpExchange::response(status, &headers), &raw);
        }
        let response: Value = serde_json::from_slice(&raw)?;
        apply_response_output(ctx, turn, state, &response);
        Ok(())
    }

    fn record_turn_metadata(&self, turn: &mut Turn, meta: &EventMetadata) -> Result<()> {
        KEY_TURN_META_PROVIDER.set(&mut turn.metadata, PROVIDER_NAME.to_string())?;
        if let Some(model) = &meta.model {
            KEY_TURN_META_MODEL.set(&mut turn.metadata, model.clone())?;
        }
        if let Some(usage) = meta.usage {
            KEY_TURN_META_USAGE.set(&mut turn.metadata, usage)?;
        }
        if let Some(stop) = &meta.stop_reason {
            KEY_TURN_META_STOP_REASON.set(&mut turn.metadata, stop.clone())?;
        }
        Ok(())
    }
}

/// Walk a non-streaming response body: reasoning blocks, message text,
/// function calls, usage. Emits Final.
fn apply_response_output(
    ctx: &InferenceContext,
    turn: &mut Turn,
    state: &mut ResponsesStream,
    response: &Value,
) {
    let mut message = String::new();
    let mut thinking = String::new();
    let mut summary = String::new();
    let mut message_item_id = String::new();
    let mut calls = Vec::new();
    let output = response.get("output").and_then(Value::as_array);
    for item in output.into_iter().flatten() {
        let id = item.get("id").and_then(Value::as_str).unwrap_or_default();
        match item.get("type").and_then(Value::as_str).unwrap_or_default() {
            "reasoning" => {
                let enc = item
                    .get("encrypted_content")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                turn.append_block(Block::reasoning(id, enc));
                for part in item.get("content").and_then(Value::as_array).into_iter().flatten() {
                    if part.get("type").and_then(Value::as_str) == Some("reasoning_text") {
                        thinking.push_str(part.get("text").and_then(Value::as_str).unwrap_or_default());
                    }
                }
                for part in item.get("summary").and_then(Value::as_array).into_iter().flatten() {
                    summary.push_str(part.get("text").and_then(Value::as_str).unwrap_or_default());
                }
                continue;
            }
            "message" if !id.is_empty() => message_item_id = id.to_string(),
            "function_call" => {
                let call_id = item.get("call_id").and_then(Value::as_str).unwrap_or_default();
                let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
                let args = item.get("arguments").and_then(Value::as_str).unwrap_or_default();
                if !call_id.is_empty() && !name.is_empty() {
                    calls.push((call_id.to_string(), name.to_string(), args.to_string(), id.to_string()));
                }
            }
            _ => {}
        }
        for part in item.get("content").and_then(Value::as_array).into_iter().flatten() {
            match part.get("type").and_then(Value::as_str).unwrap_or_default() {
                "output_text" | "text" => {
                    message.push_str(part.get("text").and_then(Value::as_str).unwrap_or_default())
                }
                "output_json" => match part.get("json") {
                    None | Some(Value::Null) => {}
                    Some(json) => message.push_str(&json.to_string()),
                },
                _ => {}
            }
        }
    }

    if !message.trim().is_empty() {
        let mut block = Block::assistant_text(message.clone());
        if !message_item_id.is_empty() {
            block = block.with_payload(PAYLOAD_KEY_ITEM_ID, Value::String(message_item_id));
        }
        turn.append_block(block);
    }
    for (call_id, name, args, item_id) in calls {
        publish_event_to_context(
            ctx,
            &Event::tool_call(
                &state.metadata,
                ToolCall {
                    id: call_id.clone(),
                    name: name.clone(),
                    input: args.clone(),
                },
            ),
        );
        turn.append_block(stream::tool_call_block(&call_id, &name, &args, &item_id));
    }

    if let Some(totals) = stream::parse_usage_from_envelope(response) {
        if let Some(usage) = totals.usage() {
            state.metadata.usage = Some(usage);
        }
        if totals.reasoning_tokens > 0 {
            state
                .metadata
                .extra
                .insert("reasoning_tokens".into(), totals.reasoning_tokens.into());
        }
    }
    let extra = &mut state.metadata.extra;
    extra.insert("thinking_text".into(), Value::String(thinking));
    extra.insert("saying_text".into(), Value::String(message.clone()));
    if !summary.is_empty() {
        extra.insert("reasoning_summary_text".into(), Value::String(summary));
    }
    if let Some(stop) = blocking_stop_reason(response) {
        state.metadata.stop_reason = Some(stop);
    }
    state.metadata.duration_ms = Some(state.elapsed_ms());
    publish_event_to_context(ctx, &Event::final_text(&state.metadata, &message));
}

/// Stop reason of a non-streaming response: explicit `stop_reason`, then
/// `incomplete_details.reason`, then `status`.
fn blocking_stop_reason(response: &Value) -> Option<String> {
    let explicit = response.get("stop_reason").and_then(Value::as_str);
    let incomplete = response
        .get("incomplete_details")
        .and_then(|d| d.get("reason"))
        .and_then(Value::as_str);
    let status = response.get("status").and_then(Value::as_str);
    explicit
        .or(incomplete)
        .or(status)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Engine for ResponsesEngine {
    async fn run_inference(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
        let ctx = ctx.with_timeout(self.settings.timeout);

        if let Some(tap) = ctx.debug_tap() {
            if let Ok(yaml) = to_yaml(turn) {
                tap.on_turn_before_conversion(&yaml);
            }
        }

        let req = self.build_request(&ctx, turn)?;
        let body = serde_json::to_vec(&req)?;
        let url = self.endpoint()?;
        tracing::debug!(
            model = %req.model,
            stream = req.stream,
            input_items = req.input.len(),
            tools = req.tools.len(),
            body_len = body.len(),
            "sending responses request"
        );

        let meta = self.metadata_for(turn, &req);
        publish_event_to_context(&ctx, &Event::start(&meta));
        let mut state = ResponsesStream::new(meta);

        let outcome = if req.stream {
            ctx.run(self.run_streaming(&ctx, turn, &mut state, &url, body)).await
        } else {
            ctx.run(self.run_blocking(&ctx, turn, &mut state, &url, body)).await
        };

        let final_meta = match outcome {
            Ok(()) if req.stream => state.finish(&ctx, turn)?,
            Ok(()) => state.metadata,
            Err(err) => {
                if !state.error_published() {
                    let mut meta = state.metadata.clone();
                    meta.duration_ms = Some(state.elapsed_ms());
                    publish_event_to_context(&ctx, &Event::error(&meta, &err));
                }
                return Err(err);
            }
        };
        self.record_turn_metadata(turn, &final_meta)
    }
}
