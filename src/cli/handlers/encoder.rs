//! Encoder command handlers: train and infer.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use super::load_corpus_inputs;
use crate::cli::output::{output_json, print_epochs, print_kv, print_success, OutputMode};
use crate::cli::CorpusArgs;
use crate::init::RunContext;
use crate::training::Controller;

pub fn handle_train(
    ctx: &RunContext,
    args: &CorpusArgs,
    base_epoch: Option<usize>,
    epochs: Option<usize>,
    mode: OutputMode,
) -> Result<()> {
    let paths = ctx.paths(args.model_name.as_deref());
    let vocab_path = args
        .vocab
        .clone()
        .unwrap_or_else(|| paths.root().join("vocab.json"));
    let inputs = load_corpus_inputs(
        &args.corpus,
        &args.classes,
        &args.kg_vectors,
        &vocab_path,
        &ctx.config,
    )?;

    let mut controller = Controller::new(&ctx.config, paths, base_epoch, &ctx.device)
        .context("Failed to initialize controller")?;
    let train_epoch = epochs.unwrap_or(ctx.config.training.train_epoch);
    let records = controller.train(&inputs.documents, &inputs.knowledge, train_epoch)?;
    controller.close();

    match mode {
        OutputMode::Json => print_epochs(&records, mode),
        OutputMode::Human => {
            print_epochs(&records, mode);
            print_success(&format!(
                "Trained {} epochs, checkpoints in {}",
                records.len(),
                controller.paths().models_dir().display()
            ));
        }
    }
    Ok(())
}

pub fn handle_infer(
    ctx: &RunContext,
    args: &CorpusArgs,
    base_epoch: usize,
    output: Option<&Path>,
    mode: OutputMode,
) -> Result<()> {
    let paths = ctx.paths(args.model_name.as_deref());
    let vocab_path = args
        .vocab
        .clone()
        .unwrap_or_else(|| paths.root().join("vocab.json"));
    if !vocab_path.exists() {
        anyhow::bail!(
            "Vocabulary {} not found; inference must reuse the training vocabulary",
            vocab_path.display()
        );
    }
    let inputs = load_corpus_inputs(
        &args.corpus,
        &args.classes,
        &args.kg_vectors,
        &vocab_path,
        &ctx.config,
    )?;

    let mut controller =
        Controller::new(&ctx.config, paths.clone(), Some(base_epoch), &ctx.device)
            .context("Failed to initialize controller")?;
    let states = controller.infer(&inputs.documents, &inputs.knowledge)?;
    controller.close();

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths.root().join(format!("states-{}.safetensors", base_epoch)));
    let tensors = HashMap::from([("state".to_string(), states.clone())]);
    candle_core::safetensors::save(&tensors, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let (rows, cols) = states.dims2()?;
    match mode {
        OutputMode::Json => output_json(&serde_json::json!({
            "documents": rows,
            "hidden_dim": cols,
            "output": output.display().to_string(),
        })),
        OutputMode::Human => {
            print_kv("documents", &rows.to_string());
            print_kv("hidden_dim", &cols.to_string());
            print_success(&format!("Wrote text states to {}", output.display()));
        }
    }
    Ok(())
}
