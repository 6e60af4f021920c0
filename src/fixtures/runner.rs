//! Drives an engine over a fixture and persists every artifact.

use std::fs::File;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::instrument::WithSubscriber;

use super::ndjson_sink::NdjsonSink;
use super::raw_tap::DiskTap;
use super::report::{build_report, format_turn};
use crate::config::EngineSettings;
use crate::context::InferenceContext;
use crate::engine::{DebugTap, Engine};
use crate::error::{GeppettoError, Result};
use crate::provider::ResponsesEngine;
use crate::turns::{save_turn_yaml, Block, Turn};

/// Timeout applied to each inference of a fixture run.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub out_dir: PathBuf,
    /// Also write each event line to stdout.
    pub echo_events: bool,
    /// Print every resulting turn to stdout.
    pub print_turns: bool,
    /// Persist raw provider traffic under `out_dir/raw`.
    pub raw_capture: bool,
    /// Capture this run's logs as JSON lines in `out_dir/logs.jsonl`.
    pub capture_logs: bool,
}

impl ExecuteOptions {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            ..Default::default()
        }
    }
}

/// Run `turn` and its follow-ups against a Responses engine built from
/// `settings`. See [`execute_fixture_with_engine`] for the artifacts.
pub async fn execute_fixture(
    ctx: &InferenceContext,
    turn: Turn,
    followups: Vec<Block>,
    settings: &EngineSettings,
    opts: &ExecuteOptions,
) -> Result<Turn> {
    let engine = ResponsesEngine::new(settings.clone())?;
    execute_fixture_with_engine(ctx, turn, followups, &engine, opts).await
}

/// Run `turn` and its follow-ups against `engine`.
///
/// Artifacts in `out_dir`:
/// - `input_turn.yaml`, `events.ndjson`, `final_turn.yaml` for the first run;
/// - for follow-up `i` (from 1): `final_turn_<i>.yaml` after appending the
///   block, `events-<i+1>.ndjson`, and `final_turn_<i+1>.yaml` after the run;
/// - `raw/` when raw capture is on, `logs.jsonl` when log capture is on;
/// - `report.md`.
///
/// A failing first run is an error. A failing follow-up is logged and ends
/// the follow-up sequence; the turn as it stood is returned.
pub async fn execute_fixture_with_engine(
    ctx: &InferenceContext,
    turn: Turn,
    followups: Vec<Block>,
    engine: &dyn Engine,
    opts: &ExecuteOptions,
) -> Result<Turn> {
    if opts.out_dir.as_os_str().is_empty() {
        return Err(GeppettoError::config("fixture out dir required"));
    }
    std::fs::create_dir_all(&opts.out_dir)?;

    let run = run_all(ctx, turn, followups, engine, opts);
    let final_turn = if opts.capture_logs {
        with_log_capture(&opts.out_dir.join("logs.jsonl"), run)?.await?
    } else {
        run.await?
    };

    build_report(&opts.out_dir)?;
    Ok(final_turn)
}

async fn run_all(
    ctx: &InferenceContext,
    mut turn: Turn,
    followups: Vec<Block>,
    engine: &dyn Engine,
    opts: &ExecuteOptions,
) -> Result<Turn> {
    let out = opts.out_dir.as_path();
    save_turn_yaml(out.join("input_turn.yaml"), &turn)?;

    run_once(ctx, &mut turn, engine, opts, 1, &out.join("events.ndjson")).await?;
    save_turn_yaml(out.join("final_turn.yaml"), &turn)?;

    for (i, block) in followups.into_iter().enumerate() {
        let step = i + 1;
        turn.append_block(block);
        save_turn_yaml(out.join(format!("final_turn_{step}.yaml")), &turn)?;

        let events = out.join(format!("events-{}.ndjson", step + 1));
        if let Err(err) = run_once(ctx, &mut turn, engine, opts, step + 1, &events).await {
            tracing::error!(step, error = %err, "follow-up inference failed; stopping follow-ups");
            break;
        }
        if let Err(err) = save_turn_yaml(out.join(format!("final_turn_{}.yaml", step + 1)), &turn) {
            tracing::error!(step, error = %err, "failed to save follow-up final turn");
            break;
        }
    }
    Ok(turn)
}

async fn run_once(
    ctx: &InferenceContext,
    turn: &mut Turn,
    engine: &dyn Engine,
    opts: &ExecuteOptions,
    turn_index: usize,
    events_path: &Path,
) -> Result<()> {
    let sink = Arc::new(NdjsonSink::create(events_path, opts.echo_events)?);
    let mut run_ctx = ctx.with_event_sink(sink).with_timeout(EXECUTION_TIMEOUT);

    let tap = if opts.raw_capture {
        let tap = Arc::new(DiskTap::new(&opts.out_dir, turn_index, turn.id.clone())?);
        run_ctx = run_ctx.with_debug_tap(tap.clone());
        Some(tap)
    } else {
        None
    };

    let result = engine.run_inference(&run_ctx, turn).await;
    if let Some(tap) = tap {
        if let Err(err) = tap.close() {
            tracing::debug!(error = %err, "raw tap close failed");
        }
    }
    result?;

    if opts.print_turns {
        println!("{}", format_turn(turn));
    }
    Ok(())
}

/// Scope a JSON log subscriber writing to `path` to one future.
fn with_log_capture<F>(path: &Path, fut: F) -> Result<impl Future<Output = F::Output>>
where
    F: Future,
{
    let file = File::create(path)?;
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(Mutex::new(file))
        .finish();
    Ok(fut.with_subscriber(subscriber))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::{publish_event_to_context, Event, EventMetadata};
    use crate::fixtures::read_event_records;
    use crate::turns::{load_turn_yaml, BlockKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every turn with "reply <n>", failing on the configured call.
    struct ScriptedEngine {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    impl ScriptedEngine {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    #[async_trait]
    impl Engine for ScriptedEngine {
        async fn run_inference(&self, ctx: &InferenceContext, turn: &mut Turn) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let meta = EventMetadata::for_inference();
            publish_event_to_context(ctx, &Event::start(&meta));
            if self.fail_on == Some(n) {
                return Err(GeppettoError::stream_protocol("scripted failure"));
            }
            tracing::info!(call = n, "scripted inference");
            let text = format!("reply {n}");
            turn.append_block(Block::assistant_text(text.clone()));
            publish_event_to_context(ctx, &Event::final_text(&meta, &text));
            Ok(())
        }
    }

    #[tokio::test]
    async fn persists_artifacts_for_initial_run_and_followups() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ExecuteOptions {
            capture_logs: true,
            ..ExecuteOptions::new(dir.path())
        };
        let turn = Turn::builder().user("Hello").build();
        let followups = vec![Block::user_text("again"), Block::user_text("once more")];
        let engine = ScriptedEngine::new(None);

        let final_turn =
            execute_fixture_with_engine(&InferenceContext::new(), turn, followups, &engine, &opts)
                .await
                .unwrap();

        assert_eq!(final_turn.blocks_of_kind(BlockKind::LlmText).count(), 3);
        for name in [
            "input_turn.yaml",
            "events.ndjson",
            "final_turn.yaml",
            "final_turn_1.yaml",
            "events-2.ndjson",
            "final_turn_2.yaml",
            "events-3.ndjson",
            "final_turn_3.yaml",
            "report.md",
            "logs.jsonl",
        ] {
            assert!(dir.path().join(name).exists(), "missing {name}");
        }

        let first = load_turn_yaml(dir.path().join("final_turn.yaml")).unwrap();
        assert_eq!(first.blocks.len(), 2);
        let kinds: Vec<String> = read_event_records(dir.path().join("events-2.ndjson"))
            .unwrap()
            .into_iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(kinds, vec!["start", "final"]);
        let logs = std::fs::read_to_string(dir.path().join("logs.jsonl")).unwrap();
        assert!(logs.contains("scripted inference"));
    }

    #[tokio::test]
    async fn failed_followup_stops_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ExecuteOptions::new(dir.path());
        let turn = Turn::builder().user("Hello").build();
        let followups = vec![Block::user_text("a"), Block::user_text("b")];
        let engine = ScriptedEngine::new(Some(2));

        let final_turn =
            execute_fixture_with_engine(&InferenceContext::new(), turn, followups, &engine, &opts)
                .await
                .unwrap();

        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert!(dir.path().join("final_turn_1.yaml").exists());
        assert!(!dir.path().join("final_turn_2.yaml").exists());
        assert!(!dir.path().join("events-3.ndjson").exists());
        assert_eq!(final_turn.blocks.last().unwrap().text_content(), Some("a"));
    }

    #[tokio::test]
    async fn failed_initial_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(Some(1));
        let err = execute_fixture_with_engine(
            &InferenceContext::new(),
            Turn::new(),
            Vec::new(),
            &engine,
            &ExecuteOptions::new(dir.path()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamProtocol);
        assert!(dir.path().join("input_turn.yaml").exists());
    }

    #[tokio::test]
    async fn out_dir_is_required() {
        let err = execute_fixture_with_engine(
            &InferenceContext::new(),
            Turn::new(),
            Vec::new(),
            &ScriptedEngine::new(None),
            &ExecuteOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
