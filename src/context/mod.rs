//! Per-inference context: event sinks, debug tap, tool registry, and
//! cancellation.
//!
//! Contexts are cheap to clone. `with_*` methods return a child context; the
//! parent is left unchanged, and cancelling a parent cancels its children.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::DebugTap;
use crate::error::{GeppettoError, Result};
use crate::events::EventSink;
use crate::tools::ToolRegistry;

#[derive(Clone, Default)]
pub struct InferenceContext {
    sinks: Vec<Arc<dyn EventSink>>,
    debug_tap: Option<Arc<dyn DebugTap>>,
    tool_registry: Option<Arc<dyn ToolRegistry>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl InferenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach one more sink; publication walks sinks in attach order.
    pub fn with_event_sink(&self, sink: Arc<dyn EventSink>) -> Self {
        let mut child = self.clone();
        child.sinks.push(sink);
        child
    }

    pub fn with_event_sinks(&self, sinks: impl IntoIterator<Item = Arc<dyn EventSink>>) -> Self {
        let mut child = self.clone();
        child.sinks.extend(sinks);
        child
    }

    pub fn with_debug_tap(&self, tap: Arc<dyn DebugTap>) -> Self {
        let mut child = self.clone();
        child.debug_tap = Some(tap);
        child
    }

    pub fn with_tool_registry(&self, registry: Arc<dyn ToolRegistry>) -> Self {
        let mut child = self.clone();
        child.tool_registry = Some(registry);
        child
    }

    /// Child context cancelled together with `token`'s parent chain.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        let mut child = self.clone();
        child.cancel = token;
        child
    }

    /// Child context with its own cancellation token linked to this one.
    pub fn child(&self) -> Self {
        let mut child = self.clone();
        child.cancel = self.cancel.child_token();
        child
    }

    /// Child context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut child = self.clone();
        let deadline = Instant::now() + timeout;
        child.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        child
    }

    pub fn event_sinks(&self) -> &[Arc<dyn EventSink>] {
        &self.sinks
    }

    pub fn debug_tap(&self) -> Option<&Arc<dyn DebugTap>> {
        self.debug_tap.as_ref()
    }

    pub fn tool_registry(&self) -> Option<&Arc<dyn ToolRegistry>> {
        self.tool_registry.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The context error, if the context is already done.
    pub fn err(&self) -> Option<GeppettoError> {
        if self.cancel.is_cancelled() {
            return Some(GeppettoError::Cancelled("context cancelled".into()));
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(GeppettoError::Cancelled("context deadline exceeded".into()))
            }
            _ => None,
        }
    }

    /// Drive `fut` until it completes, the context is cancelled, or the
    /// deadline passes. On cancellation `fut` is dropped.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(GeppettoError::Cancelled("context cancelled".into()))
            }
            _ = deadline => {
                Err(GeppettoError::Cancelled("context deadline exceeded".into()))
            }
            out = fut => out,
        }
    }
}

impl std::fmt::Debug for InferenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceContext")
            .field("sinks", &self.sinks.len())
            .field("debug_tap", &self.debug_tap.is_some())
            .field("tool_registry", &self.tool_registry.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}
