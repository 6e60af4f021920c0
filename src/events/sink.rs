//! Event sinks and context fan-out.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::event::Event;
use crate::context::InferenceContext;
use crate::error::{GeppettoError, Result};

/// A recipient of lifecycle events. Implementations serialize their own
/// writes; publication may happen from several tasks at once.
pub trait EventSink: Send + Sync {
    fn publish_event(&self, event: &Event) -> Result<()>;
}

/// Publish to every sink attached to `ctx`, in attach order.
///
/// Best effort: a failing sink is logged and skipped.
pub fn publish_event_to_context(ctx: &InferenceContext, event: &Event) {
    for sink in ctx.event_sinks() {
        if let Err(err) = sink.publish_event(event) {
            tracing::debug!(
                error = %err,
                event_type = event.type_name(),
                "event sink failed; continuing"
            );
        }
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish_event(&self, event: &Event) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| GeppettoError::stream_protocol("event channel closed"))
    }
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Wire type names of the collected events, in publish order.
    pub fn type_names(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::type_name).collect()
    }

    pub fn count(&self, type_name: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.type_name() == type_name)
            .count()
    }
}

impl EventSink for CollectingSink {
    fn publish_event(&self, event: &Event) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| GeppettoError::validation("collecting sink poisoned"))?;
        events.push(event.clone());
        Ok(())
    }
}

/// Callback invoked for each event.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Adapts a closure into a sink.
#[derive(Clone)]
pub struct FnSink(pub EventCallback);

impl FnSink {
    pub fn new(f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl std::fmt::Debug for FnSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

impl EventSink for FnSink {
    fn publish_event(&self, event: &Event) -> Result<()> {
        (self.0)(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventMetadata;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink;

    impl EventSink for FailingSink {
        fn publish_event(&self, _event: &Event) -> Result<()> {
            Err(GeppettoError::validation("nope"))
        }
    }

    #[test]
    fn publish_walks_sinks_in_attach_order_and_skips_failures() {
        let first = CollectingSink::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let ctx = InferenceContext::new()
            .with_event_sink(first.clone())
            .with_event_sink(Arc::new(FailingSink))
            .with_event_sink(Arc::new(FnSink::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })));

        let meta = EventMetadata::for_inference();
        publish_event_to_context(&ctx, &Event::start(&meta));
        publish_event_to_context(&ctx, &Event::final_text(&meta, "ok"));

        assert_eq!(first.type_names(), vec!["start", "final"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        let meta = EventMetadata::for_inference();
        sink.publish_event(&Event::start(&meta)).unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.type_name(), "start");
    }
}
