//! Tool middleware driving a scripted model and the Responses engine.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer};

use common::*;
use geppetto::context::InferenceContext;
use geppetto::engine::Engine;
use geppetto::error::Result;
use geppetto::events::CollectingSink;
use geppetto::middleware::{
    chain, handler_fn, EngineWithMiddleware, Handler, Middleware, ToolMiddleware, ToolMiddlewareConfig,
    ToolResultReorderMiddleware,
};
use geppetto::tools::{object_schema, MockToolbox, Toolbox};
use geppetto::turns::{Block, BlockKind, Turn, PAYLOAD_KEY_RESULT};

fn echo_toolbox() -> Arc<dyn Toolbox> {
    Arc::new(MockToolbox::new().with_tool(
        "echo",
        "Echo the text argument",
        object_schema().string("text", "Text to echo", true).build(),
        |args: Value| async move {
            let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok::<Value, geppetto::error::GeppettoError>(Value::String(text.to_string()))
        },
    ))
}

#[tokio::test]
async fn tool_loop_orders_call_result_and_reply() {
    let model = handler_fn(|_ctx, turn| {
        Box::pin(async move {
            if turn.find_last_block_by_kind(BlockKind::ToolCall).is_none() {
                turn.append_block(Block::tool_call("call_1", "echo", json!({ "text": "hello" })));
            } else {
                turn.append_block(Block::assistant_text("done"));
            }
            Ok(())
        })
    });
    let tools: Arc<dyn Middleware> = Arc::new(ToolMiddleware::new(
        echo_toolbox(),
        ToolMiddlewareConfig::default(),
    ));
    let handler = chain(model, &[tools]);

    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let mut turn = Turn::builder().user("please echo hello").build();
    handler.handle(&ctx, &mut turn).await.unwrap();

    let kinds: Vec<BlockKind> = turn.blocks.iter().map(|b| b.kind).collect();
    assert_eq!(
        kinds,
        vec![BlockKind::User, BlockKind::ToolCall, BlockKind::ToolUse, BlockKind::LlmText]
    );
    let tool_use = &turn.blocks[2];
    assert_eq!(tool_use.call_id(), Some("call_1"));
    assert_eq!(tool_use.payload[PAYLOAD_KEY_RESULT], json!("hello"));
    assert_eq!(turn.blocks[3].text_content(), Some("done"));

    let orders: Vec<usize> = turn.blocks.iter().map(|b| b.order).collect();
    assert_eq!(orders, vec![0, 1, 2, 3]);
    assert_eq!(sink.count("tool-call-execute"), 1);
    assert_eq!(sink.count("tool-call-execution-result"), 1);
}

#[tokio::test]
async fn responses_engine_round_trips_function_call_output() {
    let server = MockServer::start().await;
    // Follow-up request carries the tool output; mounted first so it wins.
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_string_contains(r#""type":"function_call_output""#))
        .respond_with(sse_response(&[text_delta("done"), completed(20, 2)]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(sse_response(&[
            function_call_done("call_1", "echo", r#"{"text":"hello"}"#),
            completed(10, 3),
        ]))
        .mount(&server)
        .await;

    let engine = EngineWithMiddleware::new(
        Arc::new(engine_for(&server)),
        vec![
            Arc::new(ToolResultReorderMiddleware::new()) as Arc<dyn Middleware>,
            Arc::new(ToolMiddleware::new(echo_toolbox(), ToolMiddlewareConfig::default())),
        ],
    );

    let sink = CollectingSink::new();
    let ctx = InferenceContext::new().with_event_sink(sink.clone());
    let mut turn = Turn::builder().user("please echo hello").build();
    engine.run_inference(&ctx, &mut turn).await.unwrap();

    let kinds: Vec<BlockKind> = turn.blocks.iter().map(|b| b.kind).collect();
    assert_eq!(
        kinds,
        vec![BlockKind::User, BlockKind::ToolCall, BlockKind::ToolUse, BlockKind::LlmText]
    );
    assert_eq!(sink.count("final"), 2);

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    let advertised = bodies[0]["tools"].as_array().expect("tools advertised");
    assert_eq!(advertised[0]["name"], "echo");
    assert_eq!(advertised[0]["type"], "function");

    let input = bodies[1]["input"].as_array().unwrap();
    let output = input
        .iter()
        .find(|item| item["type"] == "function_call_output")
        .expect("function_call_output item");
    assert_eq!(output["call_id"], "call_1");
    assert_eq!(output["output"], "hello");
    let call_pos = input.iter().position(|i| i["type"] == "function_call").unwrap();
    let output_pos = input.iter().position(|i| i["type"] == "function_call_output").unwrap();
    assert!(call_pos < output_pos);
}

#[tokio::test]
async fn unknown_tools_produce_error_results() {
    let model = handler_fn(|_ctx, turn| {
        Box::pin(async move {
            if turn.find_last_block_by_kind(BlockKind::ToolUse).is_none() {
                turn.append_block(Block::tool_call("c1", "missing", json!({})));
            }
            Ok(())
        })
    });
    let tools: Arc<dyn Middleware> = Arc::new(ToolMiddleware::new(
        echo_toolbox(),
        ToolMiddlewareConfig::default(),
    ));

    let mut turn = Turn::new();
    chain(model, &[tools])
        .handle(&InferenceContext::new(), &mut turn)
        .await
        .unwrap();

    let result = turn.find_last_block_by_kind(BlockKind::ToolUse).unwrap();
    let text = result.payload[PAYLOAD_KEY_RESULT].as_str().unwrap();
    assert!(text.starts_with("Error: "), "unexpected result: {text}");
    assert!(text.contains("missing"));
}

#[tokio::test]
async fn toolbox_describes_and_executes_tools() -> Result<()> {
    let schema = object_schema().string("text", "Text to echo", true).build();
    let toolbox = MockToolbox::new().with_tool("echo", "Echo", schema.clone(), |args: Value| async move {
        Ok::<Value, geppetto::error::GeppettoError>(args)
    });
    let descriptions = toolbox.get_tool_descriptions();
    assert_eq!(descriptions.len(), 1);
    assert_eq!(descriptions[0].parameters, schema);

    let out = toolbox
        .execute_tool(&InferenceContext::new(), "echo", json!({ "text": "x" }))
        .await?;
    assert_eq!(out, json!({ "text": "x" }));
    Ok(())
}
