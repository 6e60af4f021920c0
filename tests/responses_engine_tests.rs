//! Responses engine against a mock SSE endpoint.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use geppetto::context::InferenceContext;
use geppetto::engine::Engine;
use geppetto::error::ErrorKind;
use geppetto::events::{CollectingSink, EventPayload};
use geppetto::provider::ResponsesEngine;
use geppetto::turns::{
    Block, BlockKind, Turn, KEY_TURN_META_STOP_REASON, KEY_TURN_META_USAGE,
    PAYLOAD_KEY_ENCRYPTED_CONTENT,
};

fn seed_turn() -> Turn {
    Turn::builder().system("You are a LLM.").user("Hello").build()
}

fn final_events(sink: &CollectingSink) -> Vec<geppetto::events::Event> {
    sink.events()
        .into_iter()
        .filter(|e| matches!(e.payload, EventPayload::Final { .. }))
        .collect()
}

#[tokio::test]
async fn plain_chat_appends_text_and_reports_usage() {
    let server = MockServer::start().await;
    mount_stream(&server, &[text_delta("Hi"), completed(10, 5)]).await;

    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let mut turn = seed_turn();
    engine_for(&server).run_inference(&ctx, &mut turn).await.unwrap();

    let texts: Vec<&str> = turn
        .blocks_of_kind(BlockKind::LlmText)
        .filter_map(|b| b.text_content())
        .collect();
    assert_eq!(texts, vec!["Hi"]);
    assert_eq!(turn.blocks.len(), 3);

    let finals = final_events(&sink);
    assert_eq!(finals.len(), 1);
    assert!(matches!(&finals[0].payload, EventPayload::Final { text } if text == "Hi"));
    let usage = finals[0].metadata.usage.expect("usage on final");
    assert_eq!(usage.input_tokens, 10);
    assert_eq!(usage.output_tokens, 5);
    assert_eq!(sink.type_names().first(), Some(&"start"));

    let recorded = KEY_TURN_META_USAGE.get(&turn.metadata).unwrap().unwrap();
    assert_eq!(recorded.input_tokens, 10);
}

#[tokio::test]
async fn request_carries_model_stream_and_role_messages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(header("authorization", "Bearer test-key"))
        .and(header("accept", "text/event-stream"))
        .respond_with(sse_response(&[text_delta("ok"), completed(1, 1)]))
        .expect(1)
        .mount(&server)
        .await;

    let mut turn = seed_turn();
    engine_for(&server)
        .run_inference(&InferenceContext::new(), &mut turn)
        .await
        .unwrap();

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["stream"], true);
    assert_eq!(body["input"][0]["role"], "system");
    assert_eq!(body["input"][0]["content"][0]["text"], "You are a LLM.");
    assert_eq!(body["input"][1]["role"], "user");
    assert!(body.get("tools").is_none());
}

#[tokio::test]
async fn reasoning_then_message() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        &[
            reasoning_item_added("rs_1", "enc_1"),
            ("response.reasoning_text.delta", json!({ "delta": "Thinking " })),
            ("response.reasoning_text.delta", json!({ "delta": "hard." })),
            ("response.reasoning_text.done", json!({ "text": "" })),
            reasoning_item_done("rs_1", "enc_1"),
            text_delta("42"),
            completed(3, 4),
        ],
    )
    .await;

    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let mut turn = seed_turn();
    engine_for(&server).run_inference(&ctx, &mut turn).await.unwrap();

    assert!(sink.count("reasoning-text-delta") >= 1);
    assert_eq!(sink.count("reasoning-text-done"), 1);

    let reasoning: Vec<&Block> = turn.blocks_of_kind(BlockKind::Reasoning).collect();
    assert_eq!(reasoning.len(), 1);
    assert_eq!(reasoning[0].payload_str(PAYLOAD_KEY_ENCRYPTED_CONTENT), Some("enc_1"));

    let last = turn.blocks.last().unwrap();
    assert_eq!(last.kind, BlockKind::LlmText);
    assert_eq!(last.text_content(), Some("42"));

    let finals = final_events(&sink);
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].metadata.extra["thinking_text"], "Thinking hard.");
}

#[tokio::test]
async fn reasoning_done_replaying_streamed_text_is_kept_once() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        &[
            reasoning_item_added("rs_1", "enc_1"),
            ("response.reasoning_text.delta", json!({ "delta": "Thinking " })),
            ("response.reasoning_text.delta", json!({ "delta": "hard." })),
            ("response.reasoning_text.done", json!({ "text": "Thinking hard." })),
            reasoning_item_done("rs_1", "enc_1"),
            text_delta("Para one."),
            text_delta("\n\n"),
            text_delta("Para two."),
            completed(3, 4),
        ],
    )
    .await;

    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let mut turn = seed_turn();
    engine_for(&server).run_inference(&ctx, &mut turn).await.unwrap();

    let finals = final_events(&sink);
    assert_eq!(finals[0].metadata.extra["thinking_text"], "Thinking hard.");
    assert_eq!(
        turn.blocks.last().unwrap().text_content(),
        Some("Para one.\n\nPara two.")
    );
}

#[tokio::test]
async fn reasoning_across_two_items_accumulates_without_overlap() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        &[
            reasoning_item_added("rs_1", "enc_1"),
            ("response.reasoning_text.done", json!({ "text": "First thought." })),
            reasoning_item_done("rs_1", "enc_1"),
            reasoning_item_added("rs_2", "enc_2"),
            ("response.reasoning_text.done", json!({ "text": " Second thought." })),
            reasoning_item_done("rs_2", "enc_2"),
            text_delta("ok"),
            completed(1, 1),
        ],
    )
    .await;

    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let mut turn = seed_turn();
    engine_for(&server).run_inference(&ctx, &mut turn).await.unwrap();

    let finals = final_events(&sink);
    assert_eq!(
        finals[0].metadata.extra["thinking_text"],
        "First thought. Second thought."
    );
}

#[tokio::test]
async fn streaming_provider_error_fails_the_inference() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        &[(
            "error",
            json!({ "error": { "message": "stream broke", "code": "upstream_failure" } }),
        )],
    )
    .await;

    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let mut turn = seed_turn();
    let err = engine_for(&server)
        .run_inference(&ctx, &mut turn)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("stream"), "unexpected error: {err}");
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(sink.count("error") >= 1);
    assert_eq!(sink.count("final"), 0);
    assert_eq!(turn.blocks.len(), 2);
}

#[tokio::test]
async fn non_success_status_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({ "error": { "message": "slow down" } })),
        )
        .mount(&server)
        .await;

    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let err = engine_for(&server)
        .run_inference(&ctx, &mut seed_turn())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.status(), Some(429));
    assert!(err.is_retryable());
    assert!(err.to_string().starts_with("responses api error: status=429 body="));
    assert_eq!(sink.count("error"), 1);
}

#[tokio::test]
async fn function_call_items_become_tool_call_blocks() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        &[function_call_done("call_1", "echo", r#"{"text":"hello"}"#), completed(2, 2)],
    )
    .await;

    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let mut turn = seed_turn();
    engine_for(&server).run_inference(&ctx, &mut turn).await.unwrap();

    let call = turn.find_last_block_by_kind(BlockKind::ToolCall).expect("tool_call block");
    assert_eq!(call.call_id(), Some("call_1"));
    assert_eq!(call.payload["args"], json!({ "text": "hello" }));
    assert_eq!(sink.count("tool-call"), 1);
    assert_eq!(sink.count("final"), 1);
}

#[tokio::test]
async fn non_streaming_response_is_applied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": [
                {
                    "type": "reasoning",
                    "id": "rs_1",
                    "encrypted_content": "enc",
                    "summary": [{ "type": "summary_text", "text": "Greet." }],
                    "content": [{ "type": "reasoning_text", "text": "Say hello." }]
                },
                {
                    "type": "message",
                    "id": "msg_1",
                    "content": [{ "type": "output_text", "text": "Hello back" }]
                }
            ],
            "status": "completed",
            "usage": { "input_tokens": 7, "output_tokens": 3 }
        })))
        .mount(&server)
        .await;

    let engine = ResponsesEngine::new(settings_for(&server).with_stream(false)).unwrap();
    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let mut turn = seed_turn();
    engine.run_inference(&ctx, &mut turn).await.unwrap();

    assert_eq!(turn.blocks_of_kind(BlockKind::Reasoning).count(), 1);
    assert_eq!(turn.blocks.last().unwrap().text_content(), Some("Hello back"));
    let finals = final_events(&sink);
    let meta = &finals[0].metadata;
    assert_eq!(meta.usage.unwrap().input_tokens, 7);
    assert_eq!(meta.extra_str("thinking_text"), Some("Say hello."));
    assert_eq!(meta.extra_str("saying_text"), Some("Hello back"));
    assert_eq!(meta.extra_str("reasoning_summary_text"), Some("Greet."));
    assert_eq!(meta.stop_reason.as_deref(), Some("completed"));
    assert_eq!(
        KEY_TURN_META_STOP_REASON.get(&turn.metadata).unwrap().as_deref(),
        Some("completed")
    );
    assert_eq!(request_bodies(&server).await[0]["stream"], false);
}

#[tokio::test]
async fn cancelled_context_stops_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(
            sse_response(&[text_delta("late"), completed(1, 1)]).set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let ctx = InferenceContext::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let mut turn = seed_turn();
    let err = engine_for(&server)
        .run_inference(&ctx, &mut turn)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(turn.blocks.len(), 2);
}

#[tokio::test]
async fn local_endpoints_are_rejected_without_opt_in() {
    let server = MockServer::start().await;
    let settings = geppetto::config::EngineSettings::for_model("gpt-4o-mini").with_base_url(server.uri());
    let engine = ResponsesEngine::new(settings).unwrap();

    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let err = engine.run_inference(&ctx, &mut seed_turn()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(sink.count("start"), 0);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
