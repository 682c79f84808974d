//! kg4text - knowledge-graph augmented zero-shot text classification
//!
//! Usage:
//!   kg4text train --corpus train.csv --classes classes.csv --kg-vectors kg.txt
//!   kg4text infer --corpus test.csv ... --base-epoch 5
//!   kg4text bilinear train --states states-5.safetensors ... --dataset dbpedia
//!   kg4text bilinear demo        Train and score on pseudo data
//!   kg4text --help               Show all commands

use anyhow::Result;
use clap::Parser;

use kg4text::cli::output::OutputMode;
use kg4text::cli::Cli;
use kg4text::init::RunContext;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Tracing to stderr so --json output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kg4text=info".parse()?),
        )
        .init();

    let mode = OutputMode::from_json_flag(cli.json);
    let ctx = RunContext::new(cli.config.as_deref(), cli.results_dir.clone())?;
    kg4text::cli::execute(&cli.command, &ctx, mode)?;

    Ok(())
}
