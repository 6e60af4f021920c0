//! Geppetto: a provider-agnostic LLM inference runtime.
//!
//! A conversation is a [`turns::Turn`]: an ordered list of typed blocks plus
//! typed data and metadata maps. An [`engine::Engine`] sends a turn to a
//! provider, appends the model's output as new blocks, and publishes
//! lifecycle events to the sinks on the [`context::InferenceContext`].
//! Middlewares wrap an engine to add tool execution, agent modes, system
//! prompts, and logging.
//!
//! # Quick Start
//!
//! ```no_run
//! use geppetto::prelude::*;
//!
//! # async fn example() -> geppetto::error::Result<()> {
//! let settings = EngineSettings::from_env();
//! let engine = ResponsesEngine::new(settings)?;
//!
//! let sink = CollectingSink::new();
//! let ctx = InferenceContext::new().with_event_sink(sink.clone());
//! let mut turn = Turn::builder().system("You are a LLM.").user("Hello").build();
//!
//! engine.run_inference(&ctx, &mut turn).await?;
//! println!("{}", turn.blocks.last().and_then(|b| b.text_content()).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod middleware;
pub mod prelude;
pub mod provider;
pub mod security;
pub mod tools;
pub mod turns;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "fixtures")]
pub mod fixtures;
