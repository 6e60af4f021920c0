//! Moves tool results next to the tool calls that produced them.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Handler, HandlerRef, Middleware};
use crate::context::InferenceContext;
use crate::error::Result;
use crate::turns::{Block, BlockKind, Turn};

/// For each contiguous run of `tool_call` blocks, places the matching
/// `tool_use` blocks right after the run, in call order. Other blocks keep
/// their relative order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolResultReorderMiddleware;

impl ToolResultReorderMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for ToolResultReorderMiddleware {
    fn wrap(&self, next: HandlerRef) -> HandlerRef {
        Arc::new(Reorder { next })
    }
}

struct Reorder {
    next: HandlerRef,
}

#[async_trait]
impl Handler for Reorder {
    async fn handle(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
        reorder_tool_results(turn);
        self.next.handle(ctx, turn).await
    }
}

/// Apply the reordering in place. Returns whether the block order changed.
pub fn reorder_tool_results(turn: &mut Turn) -> bool {
    let Some(order) = grouped_order(&turn.blocks) else {
        return false;
    };
    if order.iter().enumerate().all(|(pos, &idx)| pos == idx) {
        return false;
    }

    let mut slots: Vec<Option<Block>> = std::mem::take(&mut turn.blocks)
        .into_iter()
        .map(Some)
        .collect();
    turn.blocks = order
        .into_iter()
        .filter_map(|idx| slots.get_mut(idx).and_then(Option::take))
        .collect();
    turn.renumber();
    tracing::debug!(turn_id = %turn.id, "tool-reorder: grouped tool results after their calls");
    true
}

/// The new index sequence, or `None` if it would not be a permutation.
fn grouped_order(blocks: &[Block]) -> Option<Vec<usize>> {
    let n = blocks.len();
    let mut moved = vec![false; n];
    let mut order = Vec::with_capacity(n);

    let mut i = 0;
    while i < n {
        if moved[i] {
            i += 1;
            continue;
        }
        if blocks[i].kind != BlockKind::ToolCall {
            order.push(i);
            i += 1;
            continue;
        }

        let run_start = i;
        let mut call_ids = Vec::new();
        while i < n && blocks[i].kind == BlockKind::ToolCall {
            order.push(i);
            if let Some(id) = blocks[i].call_id().filter(|id| !id.is_empty()) {
                call_ids.push(id);
            }
            i += 1;
        }

        let mut grouped = 0;
        for id in call_ids {
            for j in run_start + 1..n {
                if moved[j] || blocks[j].kind != BlockKind::ToolUse {
                    continue;
                }
                if blocks[j].call_id() == Some(id) {
                    order.push(j);
                    moved[j] = true;
                    grouped += 1;
                }
            }
        }
        if grouped > 0 {
            tracing::trace!(run_start, grouped, "tool-reorder: grouped run");
        }
    }

    if order.len() != n {
        tracing::warn!(old = n, new = order.len(), "tool-reorder: block count changed; keeping original order");
        return None;
    }
    Some(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn labels(turn: &Turn) -> Vec<String> {
        turn.blocks
            .iter()
            .map(|b| match b.kind {
                BlockKind::ToolCall => format!("call:{}", b.call_id().unwrap_or_default()),
                BlockKind::ToolUse => format!("use:{}", b.call_id().unwrap_or_default()),
                _ => b.text_content().unwrap_or_default().to_string(),
            })
            .collect()
    }

    #[test]
    fn moves_results_after_their_call_run() {
        let mut turn = Turn::new();
        turn.append_blocks([
            Block::user_text("q"),
            Block::tool_call("a", "t", json!({})),
            Block::tool_call("b", "t", json!({})),
            Block::assistant_text("thinking out loud"),
            Block::tool_use("b", json!("rb")),
            Block::tool_use("a", json!("ra")),
            Block::user_text("next"),
        ]);

        assert!(reorder_tool_results(&mut turn));
        assert_eq!(
            labels(&turn),
            vec!["q", "call:a", "call:b", "use:a", "use:b", "thinking out loud", "next"]
        );
        let orders: Vec<usize> = turn.blocks.iter().map(|b| b.order).collect();
        assert_eq!(orders, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn is_idempotent_on_ordered_turns() {
        let mut turn = Turn::new();
        turn.append_blocks([
            Block::tool_call("a", "t", json!({})),
            Block::tool_use("a", json!("ra")),
            Block::assistant_text("done"),
        ]);
        let before = turn.clone();
        assert!(!reorder_tool_results(&mut turn));
        assert_eq!(turn, before);
    }

    #[test]
    fn unmatched_results_stay_in_place() {
        let mut turn = Turn::new();
        turn.append_blocks([
            Block::tool_use("orphan", json!("x")),
            Block::tool_call("a", "t", json!({})),
            Block::user_text("u"),
        ]);
        let before = labels(&turn);
        reorder_tool_results(&mut turn);
        assert_eq!(labels(&turn), before);
    }

    #[tokio::test]
    async fn reorders_before_delegating() {
        use crate::middleware::handler_fn;

        let inner = handler_fn(|_ctx, turn| {
            Box::pin(async move {
                assert_eq!(turn.blocks[1].kind, BlockKind::ToolUse);
                Ok(())
            })
        });
        let handler = ToolResultReorderMiddleware::new().wrap(inner);
        let mut turn = Turn::new();
        turn.append_blocks([
            Block::tool_call("a", "t", json!({})),
            Block::user_text("u"),
            Block::tool_use("a", json!("ra")),
        ]);
        handler.handle(&InferenceContext::new(), &mut turn).await.unwrap();
    }
}
