//! Tool-calling loop: execute pending tool calls and re-run inference until
//! the model stops calling tools.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};

use super::{Handler, HandlerRef, Middleware};
use crate::context::InferenceContext;
use crate::error::{GeppettoError, Result};
use crate::events::{publish_event_to_context, Event, EventMetadata, ToolCall, ToolResult};
use crate::tools::{RetryConfig, ToolDefinition, ToolErrorHandling, Toolbox};
use crate::turns::{
    Block, BlockKind, Turn, KEY_AGENT_MODE_ALLOWED_TOOLS, KEY_TOOL_CONFIG, KEY_TOOL_REGISTRY,
    KEY_TURN_META_INFERENCE_ID, KEY_TURN_META_SESSION_ID, PAYLOAD_KEY_ARGS, PAYLOAD_KEY_NAME,
};

#[derive(Debug, Clone)]
pub struct ToolMiddlewareConfig {
    /// Maximum number of execute-and-reinfer rounds.
    pub max_iterations: usize,
    /// Timeout for one tool execution.
    pub timeout: Duration,
    /// Only these tools run; empty allows all.
    pub tool_filter: Vec<String>,
    /// Concurrent executions within one round. Results keep call order.
    pub max_parallel: usize,
    pub error_handling: ToolErrorHandling,
    pub retry: RetryConfig,
}

impl Default for ToolMiddlewareConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            timeout: Duration::from_secs(30),
            tool_filter: Vec::new(),
            max_parallel: 1,
            error_handling: ToolErrorHandling::Continue,
            retry: RetryConfig::default(),
        }
    }
}

impl ToolMiddlewareConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tool_filter(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tool_filter = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_error_handling(mut self, handling: ToolErrorHandling) -> Self {
        self.error_handling = handling;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Runs tools requested by the model through a [`Toolbox`].
///
/// Each round delegates to the inner handler, then executes every pending
/// `tool_call` (one without a matching `tool_use`) and appends its result as
/// a `tool_use` block. Execution failures become `Error: <message>` results
/// unless the config says to abort. After `max_iterations` rounds the loop
/// returns successfully and any still-pending calls stay on the turn.
pub struct ToolMiddleware {
    toolbox: Arc<dyn Toolbox>,
    config: ToolMiddlewareConfig,
}

impl ToolMiddleware {
    pub fn new(toolbox: Arc<dyn Toolbox>, config: ToolMiddlewareConfig) -> Self {
        Self { toolbox, config }
    }
}

impl Middleware for ToolMiddleware {
    fn wrap(&self, next: HandlerRef) -> HandlerRef {
        Arc::new(ToolLoop {
            toolbox: self.toolbox.clone(),
            config: self.config.clone(),
            next,
        })
    }
}

/// A tool call that has no result yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Tool calls without a `tool_use` block sharing their id, in turn order.
pub fn pending_tool_calls(turn: &Turn) -> Vec<PendingToolCall> {
    let answered: HashSet<&str> = turn
        .blocks_of_kind(BlockKind::ToolUse)
        .filter_map(Block::call_id)
        .collect();
    turn.blocks_of_kind(BlockKind::ToolCall)
        .filter_map(|block| {
            let id = block.call_id().filter(|id| !id.is_empty())?;
            if answered.contains(id) {
                return None;
            }
            Some(PendingToolCall {
                id: id.to_string(),
                name: block.payload_str(PAYLOAD_KEY_NAME).unwrap_or_default().to_string(),
                arguments: decode_arguments(block.payload.get(PAYLOAD_KEY_ARGS)),
            })
        })
        .collect()
}

/// Arguments may be stored as an object or as the raw JSON string the
/// provider streamed.
fn decode_arguments(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "tool call arguments are not valid JSON; using {{}}");
            Value::Object(Map::new())
        }),
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(other) => other.clone(),
    }
}

struct ToolLoop {
    toolbox: Arc<dyn Toolbox>,
    config: ToolMiddlewareConfig,
    next: HandlerRef,
}

#[async_trait]
impl Handler for ToolLoop {
    async fn handle(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
        self.advertise_tools(ctx, turn)?;

        let mut rounds = 0;
        loop {
            self.next.handle(ctx, turn).await?;

            let allowed = self.allowed_names(turn)?;
            let pending: Vec<PendingToolCall> = pending_tool_calls(turn)
                .into_iter()
                .filter(|call| allowed.as_ref().map_or(true, |set| set.contains(&call.name)))
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            if rounds >= self.config.max_iterations {
                tracing::warn!(
                    turn_id = %turn.id,
                    pending = pending.len(),
                    max_iterations = self.config.max_iterations,
                    "tool loop reached max iterations"
                );
                return Ok(());
            }
            if let Some(err) = ctx.err() {
                return Err(err);
            }

            let meta = event_metadata(turn);
            for call in &pending {
                publish_event_to_context(
                    ctx,
                    &Event::tool_call_execute(
                        &meta,
                        ToolCall {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.to_string(),
                        },
                    ),
                );
            }

            let outcomes: Vec<(PendingToolCall, Result<Value>)> = stream::iter(pending)
                .map(|call| async move {
                    let outcome = self.execute(ctx, &call).await;
                    (call, outcome)
                })
                .buffered(self.config.max_parallel.max(1))
                .collect()
                .await;

            if let Some(err) = ctx.err() {
                return Err(err);
            }

            for (call, outcome) in outcomes {
                let result = match outcome {
                    Ok(value) => result_text(&value),
                    Err(err) => {
                        tracing::debug!(tool = %call.name, call_id = %call.id, error = %err, "tool execution failed");
                        if self.config.error_handling == ToolErrorHandling::Abort {
                            return Err(err);
                        }
                        format!("Error: {}", error_message(&err))
                    }
                };
                publish_event_to_context(
                    ctx,
                    &Event::tool_call_execution_result(
                        &meta,
                        ToolResult {
                            id: call.id.clone(),
                            result: result.clone(),
                        },
                    ),
                );
                turn.append_block(Block::tool_use(call.id, Value::String(result)));
            }
            rounds += 1;
        }
    }
}

impl ToolLoop {
    /// Put the toolbox's tool definitions on the turn so the engine can
    /// advertise them, unless the context or turn already provides tools.
    fn advertise_tools(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
        if ctx.tool_registry().is_some() || KEY_TOOL_REGISTRY.is_set(&turn.data) {
            return Ok(());
        }
        let defs = self
            .toolbox
            .get_tool_descriptions()
            .into_iter()
            .filter(|d| self.config.tool_filter.is_empty() || self.config.tool_filter.contains(&d.name))
            .map(ToolDefinition::from)
            .collect::<Vec<_>>();
        if defs.is_empty() {
            return Ok(());
        }
        KEY_TOOL_REGISTRY.set(&mut turn.data, defs)
    }

    /// Intersection of the configured filter, the turn's tool config, and the
    /// agent mode's allowed tools. `None` means everything is allowed.
    fn allowed_names(&self, turn: &Turn) -> Result<Option<HashSet<String>>> {
        let mut sets: Vec<HashSet<String>> = Vec::new();
        if !self.config.tool_filter.is_empty() {
            sets.push(self.config.tool_filter.iter().cloned().collect());
        }
        if let Some(names) = KEY_TOOL_CONFIG.get(&turn.data)?.and_then(|c| c.allowed_tools) {
            sets.push(names.into_iter().collect());
        }
        if let Some(names) = KEY_AGENT_MODE_ALLOWED_TOOLS.get(&turn.data)? {
            if !names.is_empty() {
                sets.push(names.into_iter().collect());
            }
        }
        Ok(sets
            .into_iter()
            .reduce(|acc, set| acc.intersection(&set).cloned().collect()))
    }

    async fn execute(&self, ctx: &InferenceContext, call: &PendingToolCall) -> Result<Value> {
        let mut attempt = 0;
        loop {
            let call_ctx = ctx.with_timeout(self.config.timeout);
            let result = call_ctx
                .run(self.toolbox.execute_tool(&call_ctx, &call.name, call.arguments.clone()))
                .await;
            match result {
                Err(err)
                    if self.config.error_handling == ToolErrorHandling::Retry
                        && attempt < self.config.retry.max_retries
                        && ctx.err().is_none() =>
                {
                    let delay = self.config.retry.backoff(attempt);
                    tracing::debug!(tool = %call.name, attempt, error = %err, ?delay, "retrying tool");
                    ctx.run(async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn event_metadata(turn: &Turn) -> EventMetadata {
    EventMetadata {
        session_id: KEY_TURN_META_SESSION_ID.get(&turn.metadata).ok().flatten(),
        inference_id: KEY_TURN_META_INFERENCE_ID.get(&turn.metadata).ok().flatten(),
        turn_id: Some(turn.id.clone()),
        ..EventMetadata::for_inference()
    }
}

/// String results are kept verbatim, everything else is JSON-encoded.
fn result_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn error_message(err: &GeppettoError) -> String {
    match err {
        GeppettoError::ToolExecution { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
