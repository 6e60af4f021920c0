//! The engine abstraction: a provider that turns a Turn into an updated Turn.

pub mod debug_tap;
pub mod inference_config;

pub use debug_tap::{DebugTap, HttpExchange};
pub use inference_config::{
    InferenceConfig, OpenAiInferenceConfig, StructuredOutputConfig, StructuredOutputMode,
};

use async_trait::async_trait;

use crate::context::InferenceContext;
use crate::error::Result;
use crate::turns::Turn;

/// Runs one inference against a provider.
///
/// Implementations append zero or more blocks to `turn` and never remove or
/// reorder existing ones. Events go to the sinks on `ctx`: one Start, any
/// number of partial/thinking/tool-call events, then exactly one Final or
/// Error. When `ctx` is cancelled the engine stops I/O and returns the
/// context error; blocks appended so far stay on the turn.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn run_inference(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()>;
}
