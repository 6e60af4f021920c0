//! Middleware: handler transformers composed around an engine.
//!
//! A [`Handler`] runs one step over a turn. A [`Middleware`] wraps a handler
//! into a new one. [`chain`] right-folds middlewares so that
//! `chain(h, [m1, m2, m3])` runs as `m1(m2(m3(h)))`.
//!
//! Middlewares may append blocks and write typed data or metadata. They
//! must not reorder blocks that were already on the turn, with the single
//! exception of [`ToolResultReorderMiddleware`]. To find blocks added by an
//! inner handler, capture [`Turn::block_ids`] before delegating and diff
//! with [`Turn::blocks_added_since`] afterwards.

pub mod agent_mode;
pub mod logging;
pub mod reorder;
pub mod system_prompt;
pub mod tool;

pub use agent_mode::{AgentMode, AgentModeConfig, AgentModeMiddleware, AgentModeService, ModeChange, StaticService};
pub use logging::TurnLoggingMiddleware;
pub use reorder::ToolResultReorderMiddleware;
pub use system_prompt::SystemPromptMiddleware;
pub use tool::{ToolMiddleware, ToolMiddlewareConfig};

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::InferenceContext;
use crate::engine::Engine;
use crate::error::Result;
use crate::turns::Turn;

/// One step over a turn.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()>;
}

pub type HandlerRef = Arc<dyn Handler>;

/// Transforms a handler into another handler.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: HandlerRef) -> HandlerRef;
}

impl<F> Middleware for F
where
    F: Fn(HandlerRef) -> HandlerRef + Send + Sync,
{
    fn wrap(&self, next: HandlerRef) -> HandlerRef {
        self(next)
    }
}

/// Compose `middlewares` around `handler`; the first middleware is outermost.
pub fn chain(handler: HandlerRef, middlewares: &[Arc<dyn Middleware>]) -> HandlerRef {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware.wrap(next))
}

/// Handler backed by a closure returning a boxed future.
pub struct HandlerFn<F>(F);

/// Build a [`Handler`] from a closure.
///
/// ```ignore
/// let h = handler_fn(|_ctx, turn| Box::pin(async move {
///     turn.append_block(Block::assistant_text("hi"));
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> HandlerRef
where
    F: for<'a> Fn(&'a InferenceContext, &'a mut Turn) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(HandlerFn(f))
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a InferenceContext, &'a mut Turn) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn handle(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
        (self.0)(ctx, turn).await
    }
}

/// Adapts an [`Engine`] to the innermost handler of a chain.
pub struct EngineHandler {
    engine: Arc<dyn Engine>,
}

impl EngineHandler {
    pub fn new(engine: Arc<dyn Engine>) -> HandlerRef {
        Arc::new(Self { engine })
    }
}

#[async_trait]
impl Handler for EngineHandler {
    async fn handle(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
        self.engine.run_inference(ctx, turn).await
    }
}

/// An engine wrapped in a middleware chain. Itself an [`Engine`].
pub struct EngineWithMiddleware {
    handler: HandlerRef,
}

impl EngineWithMiddleware {
    pub fn new(engine: Arc<dyn Engine>, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            handler: chain(EngineHandler::new(engine), &middlewares),
        }
    }

    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }
}

#[async_trait]
impl Engine for EngineWithMiddleware {
    async fn run_inference(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
        self.handler.handle(ctx, turn).await
    }
}

impl std::fmt::Debug for EngineWithMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineWithMiddleware").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turns::Block;

    /// Appends a user block tagged with its name before and after `next`.
    struct Tag(&'static str);

    struct Tagged {
        name: &'static str,
        next: HandlerRef,
    }

    #[async_trait]
    impl Handler for Tagged {
        async fn handle(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
            turn.append_block(Block::user_text(format!("{}:before", self.name)));
            self.next.handle(ctx, turn).await?;
            turn.append_block(Block::user_text(format!("{}:after", self.name)));
            Ok(())
        }
    }

    impl Middleware for Tag {
        fn wrap(&self, next: HandlerRef) -> HandlerRef {
            Arc::new(Tagged { name: self.0, next })
        }
    }

    struct EchoEngine;

    #[async_trait]
    impl Engine for EchoEngine {
        async fn run_inference(&self, _ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
            turn.append_block(Block::assistant_text("engine"));
            Ok(())
        }
    }

    fn texts(turn: &Turn) -> Vec<String> {
        turn.blocks
            .iter()
            .filter_map(|b| b.text_content().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn chain_runs_first_middleware_outermost() {
        let middlewares: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(Tag("m1")), Arc::new(Tag("m2")), Arc::new(Tag("m3"))];
        let engine = EngineWithMiddleware::new(Arc::new(EchoEngine), middlewares);
        let mut turn = Turn::new();
        engine
            .run_inference(&InferenceContext::new(), &mut turn)
            .await
            .unwrap();
        assert_eq!(
            texts(&turn),
            vec![
                "m1:before", "m2:before", "m3:before", "engine", "m3:after", "m2:after",
                "m1:after"
            ]
        );
        let orders: Vec<usize> = turn.blocks.iter().map(|b| b.order).collect();
        assert_eq!(orders, (0..7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn closures_work_as_handlers_and_middlewares() {
        let inner = handler_fn(|_ctx, turn| {
            Box::pin(async move {
                turn.append_block(Block::assistant_text("inner"));
                Ok(())
            })
        });
        let passthrough = |next: HandlerRef| next;
        let handler = chain(inner, &[Arc::new(passthrough) as Arc<dyn Middleware>]);
        let mut turn = Turn::new();
        handler.handle(&InferenceContext::new(), &mut turn).await.unwrap();
        assert_eq!(texts(&turn), vec!["inner"]);
    }

    #[tokio::test]
    async fn empty_chain_is_the_engine() {
        let engine = EngineWithMiddleware::new(Arc::new(EchoEngine), Vec::new());
        let mut turn = Turn::new();
        engine
            .run_inference(&InferenceContext::new(), &mut turn)
            .await
            .unwrap();
        assert_eq!(texts(&turn), vec!["engine"]);
    }
}
