//! Command-line surface for running turn fixtures.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{EngineSettings, ReasoningEffort};
use crate::fixtures::ExecuteOptions;

/// Geppetto fixture runner
#[derive(Parser, Debug)]
#[command(name = "geppetto", version, about = "Run turn fixtures against the Responses API")]
pub struct Cli {
    /// Log level for stderr output (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a fixture and record its artifacts
    Run(RunArgs),
    /// Rebuild report.md from an existing output directory
    Report(ReportArgs),
}

/// Arguments for `geppetto run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Fixture or plain turn YAML
    #[arg(long = "in", value_name = "PATH")]
    pub input: PathBuf,

    /// Output directory
    #[arg(long, default_value = "out")]
    pub out: PathBuf,

    /// Model id; falls back to GEPPETTO_MODEL
    #[arg(short, long)]
    pub model: Option<String>,

    /// Disable streaming
    #[arg(long)]
    pub no_stream: bool,

    /// Reasoning effort (low, medium, high)
    #[arg(long)]
    pub reasoning_effort: Option<String>,

    /// Echo NDJSON events to stdout while recording
    #[arg(long)]
    pub echo_events: bool,

    /// Print each resulting turn
    #[arg(long)]
    pub print_turns: bool,

    /// Persist raw HTTP and SSE traffic under <out>/raw
    #[arg(long)]
    pub raw: bool,

    /// Capture logs as JSON lines into <out>/logs.jsonl
    #[arg(long)]
    pub capture_logs: bool,
}

/// Arguments for `geppetto report`.
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Output directory of a previous run
    #[arg(long, default_value = "out")]
    pub out: PathBuf,
}

impl RunArgs {
    /// Layer the flags over environment settings.
    pub fn engine_settings(&self, mut base: EngineSettings) -> EngineSettings {
        if let Some(model) = &self.model {
            base.chat.model = model.clone();
        }
        if self.no_stream {
            base.chat.stream = false;
        }
        if let Some(effort) = &self.reasoning_effort {
            base.reasoning.effort = Some(ReasoningEffort::from_loose(effort));
        }
        base
    }

    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            echo_events: self.echo_events,
            print_turns: self.print_turns,
            raw_capture: self.raw,
            capture_logs: self.capture_logs,
            ..ExecuteOptions::new(&self.out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_defaults() {
        let cli = Cli::try_parse_from(["geppetto", "run", "--in", "turn.yaml"]).unwrap();
        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.input, PathBuf::from("turn.yaml"));
                assert_eq!(args.out, PathBuf::from("out"));
                assert!(args.model.is_none());
                assert!(!args.no_stream);
                assert!(!args.raw);
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn run_flags_layer_over_settings() {
        let cli = Cli::try_parse_from([
            "geppetto",
            "run",
            "--in",
            "f.yaml",
            "--out",
            "artifacts",
            "-m",
            "o4-mini",
            "--no-stream",
            "--reasoning-effort",
            "HIGH",
            "--raw",
            "--capture-logs",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected Run");
        };

        let settings = args.engine_settings(EngineSettings::for_model("gpt-4o"));
        assert_eq!(settings.chat.model, "o4-mini");
        assert!(!settings.chat.stream);
        assert_eq!(settings.reasoning.effort, Some(ReasoningEffort::High));

        let opts = args.execute_options();
        assert_eq!(opts.out_dir, PathBuf::from("artifacts"));
        assert!(opts.raw_capture);
        assert!(opts.capture_logs);
        assert!(!opts.echo_events);
    }

    #[test]
    fn parse_report() {
        let cli = Cli::try_parse_from(["geppetto", "report", "--out", "x"]).unwrap();
        assert!(matches!(cli.command, Commands::Report(ReportArgs { out }) if out == PathBuf::from("x")));
    }

    #[test]
    fn run_requires_input() {
        assert!(Cli::try_parse_from(["geppetto", "run"]).is_err());
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["geppetto"]).is_err());
    }
}
