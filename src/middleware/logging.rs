//! Structured logging around each inference.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Handler, HandlerRef, Middleware};
use crate::context::InferenceContext;
use crate::error::Result;
use crate::turns::{Turn, KEY_TURN_META_INFERENCE_ID, KEY_TURN_META_SESSION_ID};

/// Logs turn identity and block counts before delegating, a per-kind
/// summary after, and the error if the inner handler fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnLoggingMiddleware;

impl TurnLoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for TurnLoggingMiddleware {
    fn wrap(&self, next: HandlerRef) -> HandlerRef {
        Arc::new(TurnLogging { next })
    }
}

struct TurnLogging {
    next: HandlerRef,
}

#[async_trait]
impl Handler for TurnLogging {
    async fn handle(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
        let session_id = KEY_TURN_META_SESSION_ID
            .get(&turn.metadata)
            .ok()
            .flatten()
            .unwrap_or_default();
        let inference_id = KEY_TURN_META_INFERENCE_ID
            .get(&turn.metadata)
            .ok()
            .flatten()
            .unwrap_or_default();
        let turn_id = turn.id.clone();
        let block_count = turn.blocks.len();

        tracing::info!(
            session_id = %session_id,
            inference_id = %inference_id,
            run_id = %turn.run_id,
            turn_id = %turn_id,
            block_count,
            "turn: starting inference"
        );

        if let Err(err) = self.next.handle(ctx, turn).await {
            tracing::error!(
                session_id = %session_id,
                inference_id = %inference_id,
                turn_id = %turn_id,
                block_count,
                error = %err,
                "turn: inference failed"
            );
            return Err(err);
        }

        let counts = turn.count_by_kind();
        let count = |kind: &str| counts.get(kind).copied().unwrap_or(0);
        tracing::info!(
            session_id = %session_id,
            inference_id = %inference_id,
            turn_id = %turn_id,
            block_count,
            result_block_count = turn.blocks.len(),
            user_blocks = count("user"),
            llm_text_blocks = count("llm_text"),
            tool_call_blocks = count("tool_call"),
            tool_use_blocks = count("tool_use"),
            system_blocks = count("system"),
            reasoning_blocks = count("reasoning"),
            other_blocks = count("other"),
            "turn: inference completed"
        );
        Ok(())
    }
}
