//! Geppetto CLI binary entry point.

use clap::Parser;
use geppetto::cli::{Cli, Commands, ReportArgs, RunArgs};
use geppetto::config::EngineSettings;
use geppetto::context::InferenceContext;
use geppetto::fixtures::{build_report, execute_fixture, load_fixture_or_turn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run(args) => handle_run(args).await,
        Commands::Report(args) => handle_report(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_run(args: RunArgs) -> geppetto::error::Result<()> {
    let (turn, followups) = load_fixture_or_turn(&args.input)?;
    let settings = args.engine_settings(EngineSettings::from_env());
    let opts = args.execute_options();

    let final_turn = execute_fixture(&InferenceContext::new(), turn, followups, &settings, &opts).await?;
    tracing::info!(
        turn_id = %final_turn.id,
        blocks = final_turn.blocks.len(),
        out = %opts.out_dir.display(),
        "fixture run complete"
    );
    Ok(())
}

fn handle_report(args: ReportArgs) -> geppetto::error::Result<()> {
    let path = build_report(&args.out)?;
    println!("{}", path.display());
    Ok(())
}
