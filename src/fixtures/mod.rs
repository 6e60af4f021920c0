//! Offline fixture runner: run a turn and its follow-ups through an engine,
//! persisting turns, events, raw provider traffic, logs, and a report.

pub mod document;
pub mod ndjson_sink;
pub mod raw_tap;
pub mod report;
pub mod runner;

pub use document::{load_fixture_or_turn, parse_fixture_or_turn, FixtureDocument};
pub use ndjson_sink::{read_event_records, EventRecord, NdjsonSink};
pub use raw_tap::DiskTap;
pub use report::{build_report, format_turn};
pub use runner::{execute_fixture, execute_fixture_with_engine, ExecuteOptions, EXECUTION_TIMEOUT};
