//! Ensures a fixed system prompt leads the turn.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Handler, HandlerRef, Middleware};
use crate::context::InferenceContext;
use crate::error::Result;
use crate::turns::{
    Block, BlockKind, Turn, KEY_BLOCK_META_MIDDLEWARE, KEY_TURN_META_INFERENCE_ID,
    KEY_TURN_META_SESSION_ID, PAYLOAD_KEY_TEXT,
};

const MIDDLEWARE_NAME: &str = "systemprompt";

/// If the first block is a system block the prompt is appended to its text
/// after a blank line; otherwise a new system block is inserted at index 0.
/// Applying it twice with the same prompt changes nothing.
#[derive(Debug, Clone)]
pub struct SystemPromptMiddleware {
    prompt: String,
}

impl SystemPromptMiddleware {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Middleware for SystemPromptMiddleware {
    fn wrap(&self, next: HandlerRef) -> HandlerRef {
        Arc::new(SystemPrompt {
            prompt: self.prompt.clone(),
            next,
        })
    }
}

struct SystemPrompt {
    prompt: String,
    next: HandlerRef,
}

#[async_trait]
impl Handler for SystemPrompt {
    async fn handle(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
        apply_system_prompt(turn, &self.prompt)?;
        self.next.handle(ctx, turn).await
    }
}

/// Apply the prompt in place.
pub fn apply_system_prompt(turn: &mut Turn, prompt: &str) -> Result<()> {
    if prompt.is_empty() {
        return Ok(());
    }
    let session_id = KEY_TURN_META_SESSION_ID.get(&turn.metadata)?.unwrap_or_default();
    let inference_id = KEY_TURN_META_INFERENCE_ID.get(&turn.metadata)?.unwrap_or_default();
    tracing::debug!(
        session_id = %session_id,
        inference_id = %inference_id,
        turn_id = %turn.id,
        block_count = turn.blocks.len(),
        prompt_len = prompt.len(),
        "systemprompt: middleware start"
    );

    match turn.blocks.first_mut() {
        Some(first) if first.kind == BlockKind::System => {
            let existing = first.text_content().unwrap_or_default();
            if existing == prompt || existing.ends_with(&format!("\n\n{prompt}")) {
                tracing::debug!(turn_id = %turn.id, "systemprompt: prompt already present");
                return Ok(());
            }
            let text = if existing.is_empty() {
                prompt.to_string()
            } else {
                format!("{existing}\n\n{prompt}")
            };
            first.payload.insert(PAYLOAD_KEY_TEXT.into(), Value::String(text));
            KEY_BLOCK_META_MIDDLEWARE.set(&mut first.metadata, MIDDLEWARE_NAME.into())?;
            tracing::debug!(turn_id = %turn.id, "systemprompt: appended to existing system block");
        }
        _ => {
            let mut block = Block::system_text(prompt);
            KEY_BLOCK_META_MIDDLEWARE.set(&mut block.metadata, MIDDLEWARE_NAME.into())?;
            turn.prepend_block(block);
            tracing::debug!(turn_id = %turn.id, "systemprompt: inserted system block");
        }
    }
    Ok(())
}
