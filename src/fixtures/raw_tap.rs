//! Debug tap persisting raw provider traffic under `<out>/raw`.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::{json, Value};

use crate::engine::{DebugTap, HttpExchange};
use crate::error::{GeppettoError, Result};

/// Files written, for turn index `n`:
/// `turn-n-http-request.json`, `turn-n-http-response.json`, `turn-n-sse.log`,
/// `turn-n-provider-<seq>-<type>.json`, `turn-n-input.yaml`.
#[derive(Debug)]
pub struct DiskTap {
    raw_dir: PathBuf,
    turn_index: usize,
    turn_id: String,
    state: Mutex<TapState>,
}

#[derive(Debug, Default)]
struct TapState {
    sse: Option<File>,
    seq: usize,
}

impl DiskTap {
    pub fn new(out_dir: impl AsRef<Path>, turn_index: usize, turn_id: impl Into<String>) -> Result<Self> {
        let raw_dir = out_dir.as_ref().join("raw");
        std::fs::create_dir_all(&raw_dir)?;
        Ok(Self {
            raw_dir,
            turn_index,
            turn_id: turn_id.into(),
            state: Mutex::new(TapState::default()),
        })
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    fn path(&self, suffix: &str) -> PathBuf {
        self.raw_dir.join(format!("turn-{}-{suffix}", self.turn_index))
    }

    fn write_json(&self, path: PathBuf, value: &impl Serialize) {
        let written = serde_json::to_vec_pretty(value)
            .map_err(GeppettoError::from)
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(GeppettoError::from));
        if let Err(err) = written {
            tracing::debug!(path = %path.display(), error = %err, "raw tap write failed");
        }
    }
}

fn json_or_string(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

impl DebugTap for DiskTap {
    fn on_http(&self, request: &HttpExchange, body: &[u8]) {
        let envelope = json!({
            "turn_index": self.turn_index,
            "turn_id": self.turn_id,
            "method": request.method,
            "url": request.url,
            "headers": request.headers,
            "body": String::from_utf8_lossy(body),
        });
        self.write_json(self.path("http-request.json"), &envelope);
    }

    fn on_http_response(&self, response: &HttpExchange, body: &[u8]) {
        let envelope = json!({
            "turn_index": self.turn_index,
            "turn_id": self.turn_id,
            "status": response.status,
            "headers": response.headers,
            "body": json_or_string(body),
        });
        self.write_json(self.path("http-response.json"), &envelope);
    }

    fn on_sse(&self, event: &str, data: &[u8]) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.sse.is_none() {
            match File::create(self.path("sse.log")) {
                Ok(mut file) => {
                    let _ = writeln!(file, "# turn_index={} turn_id={}\n", self.turn_index, self.turn_id);
                    state.sse = Some(file);
                }
                Err(err) => {
                    tracing::debug!(error = %err, "raw tap could not create sse log");
                    return;
                }
            }
        }
        if let Some(file) = state.sse.as_mut() {
            if !event.is_empty() {
                let _ = writeln!(file, "event: {event}");
            }
            let _ = file.write_all(data);
            let _ = file.write_all(b"\n\n");
        }
    }

    fn on_provider_object(&self, name: &str, value: &Value) {
        let seq = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.seq += 1;
            state.seq
        };
        let safe_name: String = name
            .chars()
            .map(|c| match c {
                '/' | '\\' => '-',
                ' ' => '_',
                other => other,
            })
            .collect();
        let wrapped = json!({
            "seq": seq,
            "type": name,
            "turn_index": self.turn_index,
            "turn_id": self.turn_id,
            "object": value,
        });
        self.write_json(self.path(&format!("provider-{seq:06}-{safe_name}.json")), &wrapped);
    }

    fn on_turn_before_conversion(&self, turn_yaml: &str) {
        if let Err(err) = std::fs::write(self.path("input.yaml"), turn_yaml) {
            tracing::debug!(error = %err, "raw tap could not write input turn");
        }
    }

    fn close(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GeppettoError::stream_protocol("raw tap lock poisoned"))?;
        if let Some(mut file) = state.sse.take() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_raw_artifacts_per_turn_index() {
        let dir = tempfile::tempdir().unwrap();
        let tap = DiskTap::new(dir.path(), 2, "t-1").unwrap();

        tap.on_http(
            &HttpExchange {
                method: "POST".into(),
                url: "https://api.example/v1/responses".into(),
                ..Default::default()
            },
            br#"{"model":"gpt-4o"}"#,
        );
        tap.on_http_response(&HttpExchange { status: Some(200), ..Default::default() }, b"");
        tap.on_sse("response.output_text.delta", br#"{"delta":"Hi"}"#);
        tap.on_provider_object("output/message", &json!({"id": "msg_1"}));
        tap.on_turn_before_conversion("id: t-1\n");
        tap.close().unwrap();

        let raw = tap.raw_dir();
        let request: Value =
            serde_json::from_slice(&std::fs::read(raw.join("turn-2-http-request.json")).unwrap()).unwrap();
        assert_eq!(request["method"], "POST");
        assert_eq!(request["turn_id"], "t-1");

        let sse = std::fs::read_to_string(raw.join("turn-2-sse.log")).unwrap();
        assert!(sse.starts_with("# turn_index=2 turn_id=t-1"));
        assert!(sse.contains("event: response.output_text.delta\n{\"delta\":\"Hi\"}\n\n"));

        assert!(raw.join("turn-2-provider-000001-output-message.json").exists());
        assert_eq!(std::fs::read_to_string(raw.join("turn-2-input.yaml")).unwrap(), "id: t-1\n");
    }
}
