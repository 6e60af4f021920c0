//! Markdown summary of a fixture run.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use super::ndjson_sink::read_event_records;
use crate::error::Result;
use crate::turns::{BlockKind, Turn, PAYLOAD_KEY_ARGS, PAYLOAD_KEY_NAME, PAYLOAD_KEY_RESULT};

/// Write `report.md` into `out_dir` from the artifacts of a run and return
/// its path. Missing artifacts are reported as such.
pub fn build_report(out_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let out_dir = out_dir.as_ref();
    let input_yaml = std::fs::read_to_string(out_dir.join("input_turn.yaml")).ok();
    let final_yaml = std::fs::read_to_string(out_dir.join("final_turn.yaml")).ok();
    let records = read_event_records(out_dir.join("events.ndjson")).unwrap_or_default();

    let model = records.iter().find_map(|r| {
        r.event
            .get("metadata")
            .and_then(|m| m.get("model"))
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
    });
    let final_text = records
        .iter()
        .filter(|r| r.kind == "final")
        .filter_map(|r| r.event.get("text").and_then(|t| t.as_str()))
        .last();

    let mut out = String::from("# E2E Responses Report\n\n");
    if let Some(model) = &model {
        let _ = writeln!(out, "- Model: {model}");
    }
    let _ = writeln!(
        out,
        "- Generated: {}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    yaml_section(&mut out, "Input Turn (YAML)", input_yaml.as_deref());
    yaml_section(&mut out, "Final Turn (YAML)", final_yaml.as_deref());
    out.push_str("## Final Assistant Text\n\n");
    match final_text {
        Some(text) if !text.is_empty() => {
            let _ = writeln!(out, "{text}\n");
        }
        _ => out.push_str("(not found)\n\n"),
    }
    out.push_str("## Event Timeline\n\n");
    for record in &records {
        let _ = writeln!(out, "- {} @ {}", record.kind, record.ts);
    }

    let path = out_dir.join("report.md");
    std::fs::write(&path, out)?;
    Ok(path)
}

fn yaml_section(out: &mut String, title: &str, body: Option<&str>) {
    let _ = writeln!(out, "## {title}\n");
    match body {
        Some(body) if !body.is_empty() => {
            let _ = writeln!(out, "```yaml\n{body}\n```\n");
        }
        _ => out.push_str("(missing)\n\n"),
    }
}

/// Human-readable rendering of a turn, one line per block.
pub fn format_turn(turn: &Turn) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "turn {}", turn.id);
    for block in &turn.blocks {
        let role = if block.role.is_empty() { "-" } else { block.role.as_str() };
        let detail = match block.kind {
            BlockKind::ToolCall => format!(
                "{}({}) id={}",
                block.payload_str(PAYLOAD_KEY_NAME).unwrap_or_default(),
                block.payload.get(PAYLOAD_KEY_ARGS).map(|a| a.to_string()).unwrap_or_default(),
                block.call_id().unwrap_or_default()
            ),
            BlockKind::ToolUse => format!(
                "id={} result={}",
                block.call_id().unwrap_or_default(),
                block.payload.get(PAYLOAD_KEY_RESULT).map(|r| r.to_string()).unwrap_or_default()
            ),
            _ => block.text_content().unwrap_or_default().to_string(),
        };
        let _ = writeln!(out, "  [{}] {} {}: {}", block.order, role, block.kind, detail);
    }
    out
}
