//! Shared test helpers: SSE bodies and a mock Responses endpoint.

#![allow(dead_code)]

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use geppetto::config::EngineSettings;
use geppetto::provider::ResponsesEngine;

/// Render `(event, data)` pairs as an SSE body.
pub fn sse_body(events: &[(&str, Value)]) -> String {
    events
        .iter()
        .map(|(name, data)| format!("event: {name}\ndata: {data}\n\n"))
        .collect()
}

pub fn sse_response(events: &[(&str, Value)]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse_body(events))
}

pub fn text_delta(text: &str) -> (&'static str, Value) {
    ("response.output_text.delta", json!({ "delta": text }))
}

pub fn completed(input_tokens: i64, output_tokens: i64) -> (&'static str, Value) {
    (
        "response.completed",
        json!({
            "response": {
                "usage": { "input_tokens": input_tokens, "output_tokens": output_tokens }
            }
        }),
    )
}

pub fn reasoning_item_added(id: &str, encrypted: &str) -> (&'static str, Value) {
    (
        "response.output_item.added",
        json!({ "item": { "type": "reasoning", "id": id, "encrypted_content": encrypted } }),
    )
}

pub fn reasoning_item_done(id: &str, encrypted: &str) -> (&'static str, Value) {
    (
        "response.output_item.done",
        json!({ "item": { "type": "reasoning", "id": id, "encrypted_content": encrypted } }),
    )
}

pub fn function_call_done(call_id: &str, name: &str, arguments: &str) -> (&'static str, Value) {
    (
        "response.output_item.done",
        json!({
            "item": {
                "type": "function_call",
                "id": format!("fc_{call_id}"),
                "call_id": call_id,
                "name": name,
                "arguments": arguments,
            }
        }),
    )
}

/// Mount `events` as the answer to every POST /responses.
pub async fn mount_stream(server: &MockServer, events: &[(&str, Value)]) {
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(sse_response(events))
        .mount(server)
        .await;
}

pub fn settings_for(server: &MockServer) -> EngineSettings {
    EngineSettings::for_model("gpt-4o-mini")
        .with_api_key("test-key")
        .with_base_url(server.uri())
        .allow_local_endpoints()
}

pub fn engine_for(server: &MockServer) -> ResponsesEngine {
    ResponsesEngine::new(settings_for(server)).expect("engine")
}

/// Decoded JSON bodies of every request the server received.
pub async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).expect("json request body"))
        .collect()
}
