//! Agent modes: named profiles that restrict tools and inject a prompt, with
//! model-driven switching through a YAML directive.

pub mod service;
pub mod yaml;

pub use service::{AgentMode, AgentModeService, ModeChange, StaticService};
pub use yaml::{build_yaml_mode_switch_instructions, detect_yaml_mode_switch, extract_yaml_blocks, ModeSwitch};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};

use super::{Handler, HandlerRef, Middleware};
use crate::context::InferenceContext;
use crate::error::Result;
use crate::events::{publish_event_to_context, Event, EventMetadata};
use crate::turns::{
    Block, Turn, KEY_AGENT_MODE, KEY_AGENT_MODE_ALLOWED_TOOLS, KEY_BLOCK_META_AGENT_MODE,
    KEY_BLOCK_META_AGENT_MODE_TAG, KEY_BLOCK_META_MIDDLEWARE, KEY_TURN_META_SESSION_ID,
};

const TAG_PROMPT: &str = "agentmode_system_prompt";
const TAG_INSTRUCTIONS: &str = "agentmode_switch_instructions";

#[derive(Debug, Clone)]
pub struct AgentModeConfig {
    /// Mode used when neither the turn nor the service names one.
    pub default_mode: String,
}

impl Default for AgentModeConfig {
    fn default() -> Self {
        Self {
            default_mode: "default".to_string(),
        }
    }
}

impl AgentModeConfig {
    pub fn with_default_mode(mut self, mode: impl Into<String>) -> Self {
        self.default_mode = mode.into();
        self
    }
}

/// Injects the current mode's prompt and switch instructions, publishes the
/// allowed tools for downstream middleware, and applies switches the model
/// requests in its reply. A switch takes effect on the next invocation.
pub struct AgentModeMiddleware {
    service: Arc<dyn AgentModeService>,
    config: AgentModeConfig,
}

impl AgentModeMiddleware {
    pub fn new(service: Arc<dyn AgentModeService>, config: AgentModeConfig) -> Self {
        Self { service, config }
    }
}

impl Middleware for AgentModeMiddleware {
    fn wrap(&self, next: HandlerRef) -> HandlerRef {
        Arc::new(AgentModeHandler {
            service: self.service.clone(),
            config: self.config.clone(),
            next,
        })
    }
}

struct AgentModeHandler {
    service: Arc<dyn AgentModeService>,
    config: AgentModeConfig,
    next: HandlerRef,
}

#[async_trait]
impl Handler for AgentModeHandler {
    async fn handle(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
        tracing::debug!(run_id = %turn.run_id, turn_id = %turn.id, "agentmode: middleware start");

        let mode_name = self.current_mode_name(turn).await?;
        KEY_AGENT_MODE.set(&mut turn.data, mode_name.clone())?;

        match self.service.get_mode(&mode_name).await {
            Ok(mode) => self.inject(ctx, turn, &mode)?,
            Err(err) => {
                tracing::warn!(requested_mode = %mode_name, error = %err, "agentmode: unknown mode; continuing without restrictions");
            }
        }

        let before = turn.block_ids();
        self.next.handle(ctx, turn).await?;

        let Some(switch) = detect_yaml_mode_switch(turn.blocks_added_since(&before)) else {
            tracing::debug!(run_id = %turn.run_id, turn_id = %turn.id, "agentmode: middleware end");
            return Ok(());
        };
        let meta = event_metadata(turn);

        if switch.new_mode.is_empty() || switch.new_mode == mode_name {
            if !switch.analysis.is_empty() {
                publish_event_to_context(
                    ctx,
                    &Event::agent_mode_switch(&meta, &mode_name, &mode_name, &switch.analysis),
                );
            }
            return Ok(());
        }

        tracing::debug!(from = %mode_name, to = %switch.new_mode, "agentmode: detected mode switch via YAML");
        KEY_AGENT_MODE.set(&mut turn.data, switch.new_mode.clone())?;
        let change = ModeChange::new(
            turn.run_id.clone(),
            turn.id.clone(),
            mode_name.clone(),
            switch.new_mode.clone(),
            switch.analysis.clone(),
        );
        if let Err(err) = self.service.record_mode_change(change).await {
            tracing::warn!(error = %err, "agentmode: failed to record mode change");
        }
        turn.append_block(Block::system_text(format!(
            "[agent-mode] switched to {}",
            switch.new_mode
        )));
        publish_event_to_context(
            ctx,
            &Event::agent_mode_switch(&meta, &mode_name, &switch.new_mode, &switch.analysis),
        );
        Ok(())
    }
}

impl AgentModeHandler {
    /// Turn data first, then the service's record for the run, then the
    /// configured default.
    async fn current_mode_name(&self, turn: &Turn) -> Result<String> {
        if let Some(name) = KEY_AGENT_MODE.get(&turn.data)?.filter(|n| !n.is_empty()) {
            return Ok(name);
        }
        if !turn.run_id.is_empty() {
            match self.service.get_current_mode(&turn.run_id).await {
                Ok(Some(name)) if !name.is_empty() => return Ok(name),
                Ok(_) => {}
                Err(err) => tracing::debug!(error = %err, "agentmode: current mode lookup failed"),
            }
        }
        Ok(self.config.default_mode.clone())
    }

    fn inject(&self, ctx: &InferenceContext, turn: &mut Turn, mode: &AgentMode) -> Result<()> {
        let stale = |b: &Block| {
            KEY_BLOCK_META_AGENT_MODE_TAG
                .get(&b.metadata)
                .ok()
                .flatten()
                .is_some_and(|tag| tag == TAG_PROMPT || tag == TAG_INSTRUCTIONS)
        };
        if turn.blocks.iter().any(stale) {
            turn.blocks.retain(|b| !stale(b));
            turn.renumber();
        }

        let prompt = mode.prompt.trim();
        if !prompt.is_empty() {
            turn.append_block(tagged_system_block(prompt, TAG_PROMPT, &mode.name)?);
        }
        let instructions = build_yaml_mode_switch_instructions(&mode.name, &self.service.mode_names());
        turn.append_block(tagged_system_block(&instructions, TAG_INSTRUCTIONS, &mode.name)?);

        if mode.allowed_tools.is_empty() {
            KEY_AGENT_MODE_ALLOWED_TOOLS.delete(&mut turn.data);
        } else {
            KEY_AGENT_MODE_ALLOWED_TOOLS.set(&mut turn.data, mode.allowed_tools.clone())?;
        }

        let mut fields = Map::new();
        fields.insert("mode".into(), json!(mode.name));
        publish_event_to_context(
            ctx,
            &Event::log(&event_metadata(turn), "info", "agentmode: prompt inserted", fields),
        );
        Ok(())
    }
}

fn tagged_system_block(text: &str, tag: &str, mode: &str) -> Result<Block> {
    let mut block = Block::system_text(text);
    KEY_BLOCK_META_AGENT_MODE_TAG.set(&mut block.metadata, tag.to_string())?;
    KEY_BLOCK_META_AGENT_MODE.set(&mut block.metadata, mode.to_string())?;
    KEY_BLOCK_META_MIDDLEWARE.set(&mut block.metadata, "agentmode".to_string())?;
    Ok(block)
}

fn event_metadata(turn: &Turn) -> EventMetadata {
    EventMetadata {
        session_id: KEY_TURN_META_SESSION_ID.get(&turn.metadata).ok().flatten(),
        turn_id: Some(turn.id.clone()),
        ..EventMetadata::for_inference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingSink, EventPayload};
    use crate::middleware::handler_fn;
    use crate::turns::BlockKind;
    use pretty_assertions::assert_eq;

    fn service() -> Arc<StaticService> {
        Arc::new(StaticService::new([
            AgentMode::new("chat").with_prompt("You chat."),
            AgentMode::new("clock")
                .with_prompt("You tell time.")
                .with_allowed_tools(["time"]),
        ]))
    }

    fn replying(text: &'static str) -> HandlerRef {
        handler_fn(move |_ctx, turn| {
            Box::pin(async move {
                turn.append_block(Block::assistant_text(text));
                Ok(())
            })
        })
    }

    fn middleware(svc: Arc<StaticService>, default_mode: &str) -> AgentModeMiddleware {
        AgentModeMiddleware::new(svc, AgentModeConfig::default().with_default_mode(default_mode))
    }

    #[tokio::test]
    async fn injects_prompt_and_instructions_without_duplicates() {
        let svc = service();
        let handler = middleware(svc, "clock").wrap(replying("ok"));
        let mut turn = Turn::builder().run_id("r1").user("hi").build();
        let ctx = InferenceContext::new();

        handler.handle(&ctx, &mut turn).await.unwrap();
        handler.handle(&ctx, &mut turn).await.unwrap();

        let systems: Vec<&str> = turn
            .blocks_of_kind(BlockKind::System)
            .filter_map(Block::text_content)
            .collect();
        assert_eq!(systems.len(), 2);
        assert_eq!(systems[0], "You tell time.");
        assert!(systems[1].contains("Current mode: clock"));
        assert!(systems[1].contains("Available modes: chat, clock"));
        assert_eq!(
            KEY_AGENT_MODE_ALLOWED_TOOLS.get(&turn.data).unwrap(),
            Some(vec!["time".to_string()])
        );
        assert_eq!(KEY_AGENT_MODE.get(&turn.data).unwrap().as_deref(), Some("clock"));
    }

    #[tokio::test]
    async fn switches_mode_from_yaml_directive() {
        let svc = service();
        let handler = middleware(svc.clone(), "chat").wrap(replying(
            "Let me switch.\n```yaml\nmode_switch:\n  analysis: need time\n  new_mode: clock\n```",
        ));
        let sink = CollectingSink::new();
        let ctx = InferenceContext::new().with_event_sink(sink.clone());
        let mut turn = Turn::builder().run_id("r1").user("what time is it?").build();

        handler.handle(&ctx, &mut turn).await.unwrap();

        assert_eq!(KEY_AGENT_MODE.get(&turn.data).unwrap().as_deref(), Some("clock"));
        let last = turn.blocks.last().unwrap();
        assert_eq!(last.kind, BlockKind::System);
        assert_eq!(last.text_content(), Some("[agent-mode] switched to clock"));
        let changes = svc.changes("r1");
        assert_eq!(changes.len(), 1);
        assert_eq!((changes[0].from_mode.as_str(), changes[0].to_mode.as_str()), ("chat", "clock"));
        assert_eq!(svc.get_current_mode("r1").await.unwrap().as_deref(), Some("clock"));

        let switch = sink
            .events()
            .into_iter()
            .find_map(|e| match e.payload {
                EventPayload::AgentModeSwitch { from, to, analysis } => Some((from, to, analysis)),
                _ => None,
            })
            .unwrap();
        assert_eq!(switch, ("chat".into(), "clock".into(), "need time".into()));
    }

    #[tokio::test]
    async fn restores_mode_from_service_for_the_run() {
        let svc = service();
        svc.record_mode_change(ModeChange::new("r7", "t0", "chat", "clock", ""))
            .await
            .unwrap();
        let handler = middleware(svc, "chat").wrap(replying("ok"));
        let mut turn = Turn::builder().run_id("r7").user("hi").build();
        handler.handle(&InferenceContext::new(), &mut turn).await.unwrap();
        assert_eq!(KEY_AGENT_MODE.get(&turn.data).unwrap().as_deref(), Some("clock"));
    }

    #[tokio::test]
    async fn unknown_mode_runs_unrestricted() {
        let handler = middleware(service(), "missing").wrap(replying("ok"));
        let mut turn = Turn::builder().user("hi").build();
        handler.handle(&InferenceContext::new(), &mut turn).await.unwrap();
        assert_eq!(turn.blocks_of_kind(BlockKind::System).count(), 0);
        assert_eq!(KEY_AGENT_MODE_ALLOWED_TOOLS.get(&turn.data).unwrap(), None);
    }

    #[tokio::test]
    async fn directive_for_the_current_mode_is_not_a_switch() {
        let svc = service();
        let handler = middleware(svc.clone(), "chat").wrap(replying(
            "```yaml\nmode_switch:\n  analysis: fine here\n  new_mode: chat\n```",
        ));
        let mut turn = Turn::builder().run_id("r1").user("hi").build();
        handler.handle(&InferenceContext::new(), &mut turn).await.unwrap();
        assert!(svc.changes("r1").is_empty());
        assert_eq!(turn.blocks.last().unwrap().kind, BlockKind::LlmText);
    }
}
