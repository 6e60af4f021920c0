//! Event sink writing one JSON object per line.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{GeppettoError, Result};
use crate::events::{Event, EventSink};

/// One NDJSON line: `{type, event, ts}` with `ts` in Unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub event: serde_json::Value,
    pub ts: i64,
}

/// Appends events to a file, optionally echoing each line to stdout.
#[derive(Debug)]
pub struct NdjsonSink {
    file: Mutex<File>,
    echo: bool,
}

impl NdjsonSink {
    /// Create (truncate) `path`.
    pub fn create(path: impl AsRef<Path>, echo: bool) -> Result<Self> {
        Ok(Self {
            file: Mutex::new(File::create(path)?),
            echo,
        })
    }
}

impl EventSink for NdjsonSink {
    fn publish_event(&self, event: &Event) -> Result<()> {
        let record = EventRecord {
            kind: event.type_name().to_string(),
            event: serde_json::to_value(event)?,
            ts: Utc::now().timestamp_millis(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| GeppettoError::stream_protocol("ndjson sink lock poisoned"))?;
        file.write_all(&line)?;
        if self.echo {
            std::io::stdout().write_all(&line)?;
        }
        Ok(())
    }
}

/// Read back the records of an NDJSON event file, skipping malformed lines.
pub fn read_event_records(path: impl AsRef<Path>) -> Result<Vec<EventRecord>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
