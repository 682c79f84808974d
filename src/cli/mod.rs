//! CLI interface for kg4text.

pub mod handlers;
pub mod output;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::init::RunContext;
use output::OutputMode;

/// kg4text - knowledge-graph augmented zero-shot text classification
#[derive(Parser)]
#[command(name = "kg4text", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, env = "KG4TEXT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Override results directory (default: ./results or ~/.kg4text/results)
    #[arg(long, env = "KG4TEXT_RESULTS_DIR", global = true)]
    pub results_dir: Option<PathBuf>,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Corpus inputs shared by encoder commands.
#[derive(Args, Debug, Clone)]
pub struct CorpusArgs {
    /// Corpus CSV with `text` and `class` columns
    #[arg(long)]
    pub corpus: PathBuf,

    /// Class dictionary CSV with `ClassCode` and `ConceptNet` columns
    #[arg(long)]
    pub classes: PathBuf,

    /// Whitespace-separated KG vectors (`concept v1 ... vK`)
    #[arg(long)]
    pub kg_vectors: PathBuf,

    /// Vocabulary JSON; built from the corpus and saved here when missing
    #[arg(long)]
    pub vocab: Option<PathBuf>,

    /// Model name (default from config)
    #[arg(long)]
    pub model_name: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train the knowledge-aware text encoder
    Train {
        #[command(flatten)]
        corpus: CorpusArgs,
        /// Resume from this epoch's checkpoint
        #[arg(long)]
        base_epoch: Option<usize>,
        /// Additional epochs after the first (default from config)
        #[arg(long)]
        epochs: Option<usize>,
    },

    /// Encode a corpus with a trained encoder
    Infer {
        #[command(flatten)]
        corpus: CorpusArgs,
        /// Trained epoch to load (must be > 0)
        #[arg(long)]
        base_epoch: usize,
        /// Output safetensors file (tensor `state`)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Bilinear document/class scorer
    #[command(subcommand)]
    Bilinear(BilinearCommands),
}

/// Inputs of a bilinear run over encoded documents.
#[derive(Args, Debug, Clone)]
pub struct ScorerArgs {
    /// Text states written by `infer`
    #[arg(long)]
    pub states: PathBuf,

    /// Corpus CSV the states were computed from (labels)
    #[arg(long)]
    pub corpus: PathBuf,

    /// Class dictionary CSV
    #[arg(long)]
    pub classes: PathBuf,

    /// KG vectors for the class concepts
    #[arg(long)]
    pub kg_vectors: PathBuf,

    /// Dataset name used for the saved matrix
    #[arg(long)]
    pub dataset: String,
}

#[derive(Subcommand)]
pub enum BilinearCommands {
    /// Train the bilinear matrix
    Train {
        #[command(flatten)]
        args: ScorerArgs,
    },

    /// Evaluate a saved bilinear matrix
    Test {
        #[command(flatten)]
        args: ScorerArgs,
    },

    /// Train and evaluate on generated pseudo data
    Demo {
        /// Training instances
        #[arg(long, default_value = "1000")]
        num_text: usize,
        /// Classes
        #[arg(long, default_value = "10")]
        num_classes: usize,
        /// Dataset name used for the saved matrix
        #[arg(long, default_value = "pseudo")]
        dataset: String,
    },
}

/// Execute a CLI command.
pub fn execute(command: &Commands, ctx: &RunContext, mode: OutputMode) -> anyhow::Result<()> {
    match command {
        Commands::Train {
            corpus,
            base_epoch,
            epochs,
        } => handlers::encoder::handle_train(ctx, corpus, *base_epoch, *epochs, mode)?,

        Commands::Infer {
            corpus,
            base_epoch,
            output,
        } => handlers::encoder::handle_infer(ctx, corpus, *base_epoch, output.as_deref(), mode)?,

        Commands::Bilinear(BilinearCommands::Train { args }) => {
            handlers::bilinear::handle_train(ctx, args, mode)?
        }

        Commands::Bilinear(BilinearCommands::Test { args }) => {
            handlers::bilinear::handle_test(ctx, args, mode)?
        }

        Commands::Bilinear(BilinearCommands::Demo {
            num_text,
            num_classes,
            dataset,
        }) => handlers::bilinear::handle_demo(ctx, *num_text, *num_classes, dataset, mode)?,
    }

    Ok(())
}
