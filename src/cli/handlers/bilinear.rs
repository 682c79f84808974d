//! Bilinear scorer handlers: train, test and the pseudo-data demo.

use anyhow::{Context, Result};
use candle_core::Device;
use ndarray::{Array2, ArrayView2};

use super::read_classes;
use crate::cli::output::{
    output_json, print_header, print_stats, print_success, print_table, OutputMode,
};
use crate::cli::ScorerArgs;
use crate::config::BilinearConfig;
use crate::data::loader::{read_corpus, read_kg_vectors};
use crate::init::RunContext;
use crate::models::bilinear::matrix_path;
use crate::models::{tensor_to_array, BilinearScorer, PseudoData};

/// Text states, class vectors and labels of a corpus, aligned row by row.
struct ScorerInputs {
    text: Array2<f32>,
    classes: Array2<f32>,
    labels: Array2<u8>,
}

impl ScorerInputs {
    fn load(ctx: &RunContext, args: &ScorerArgs) -> Result<Self> {
        let states = candle_core::safetensors::load(&args.states, &Device::Cpu)
            .with_context(|| format!("Failed to read states {}", args.states.display()))?;
        let state = states
            .get("state")
            .with_context(|| format!("No `state` tensor in {}", args.states.display()))?;
        let text = tensor_to_array(state)?;

        let records = read_corpus(&args.corpus)
            .with_context(|| format!("Failed to read corpus {}", args.corpus.display()))?;
        if records.len() != text.nrows() {
            anyhow::bail!(
                "{} holds {} states but the corpus has {} documents",
                args.states.display(),
                text.nrows(),
                records.len()
            );
        }

        let class_dict = read_classes(&args.classes)?;
        let vectors = read_kg_vectors(&args.kg_vectors, ctx.config.encoder.kg_vector_dim)
            .with_context(|| format!("Failed to read KG vectors {}", args.kg_vectors.display()))?;
        let labels = class_dict.one_hot(records.iter().map(|r| r.class.as_str()));
        let classes = class_dict.class_matrix(&vectors);

        Ok(Self {
            text,
            classes,
            labels,
        })
    }

    /// Scorer settings with `M` sized to these inputs.
    fn config(&self, base: &BilinearConfig) -> BilinearConfig {
        BilinearConfig {
            v_t_dim: self.text.ncols(),
            v_c_dim: self.classes.ncols(),
            ..base.clone()
        }
    }

    fn single_label(&self) -> bool {
        self.labels
            .rows()
            .into_iter()
            .all(|row| row.iter().filter(|&&y| y == 1).count() == 1)
    }
}

pub fn handle_train(ctx: &RunContext, args: &ScorerArgs, mode: OutputMode) -> Result<()> {
    let inputs = ScorerInputs::load(ctx, args)?;
    let config = inputs.config(&ctx.config.bilinear);
    let dir = ctx.bilinear_dir();

    let mut scorer = BilinearScorer::new(&config, &ctx.device)?;
    let losses = scorer
        .train(
            inputs.text.view(),
            inputs.classes.view(),
            inputs.labels.view(),
            &args.dataset,
            &dir,
        )
        .context("Bilinear training failed")?;
    let stats = scorer.evaluate(
        inputs.text.view(),
        inputs.classes.view(),
        inputs.labels.view(),
        inputs.single_label(),
    )?;

    print_stats(&format!("{} (train)", args.dataset), &stats, mode);
    if mode == OutputMode::Human {
        if let Some(last) = losses.last() {
            print_success(&format!(
                "Trained {} epochs, final loss {:.6}, matrix at {}",
                losses.len(),
                last,
                matrix_path(&dir, &args.dataset).display()
            ));
        }
    }
    Ok(())
}

pub fn handle_test(ctx: &RunContext, args: &ScorerArgs, mode: OutputMode) -> Result<()> {
    let inputs = ScorerInputs::load(ctx, args)?;
    let config = inputs.config(&ctx.config.bilinear);

    let mut scorer = BilinearScorer::new(&config, &ctx.device)?;
    scorer
        .load(&ctx.bilinear_dir(), &args.dataset)
        .with_context(|| format!("No trained matrix for dataset '{}'", args.dataset))?;
    let stats = scorer.evaluate(
        inputs.text.view(),
        inputs.classes.view(),
        inputs.labels.view(),
        inputs.single_label(),
    )?;
    print_stats(&args.dataset, &stats, mode);
    Ok(())
}

fn prediction_rows(predictions: ArrayView2<u8>) -> Vec<Vec<String>> {
    predictions
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            std::iter::once(i.to_string())
                .chain(row.iter().map(|y| y.to_string()))
                .collect()
        })
        .collect()
}

/// Train on pseudo data, then predict and score on fresh and seen samples.
pub fn handle_demo(
    ctx: &RunContext,
    num_text: usize,
    num_classes: usize,
    dataset: &str,
    mode: OutputMode,
) -> Result<()> {
    let config = &ctx.config.bilinear;
    let dir = ctx.bilinear_dir();
    let train = PseudoData::generate(num_text, num_classes, config, config.seed);

    let mut scorer = BilinearScorer::new(config, &ctx.device)?;
    scorer.train(
        train.text.view(),
        train.classes.view(),
        train.labels.view(),
        dataset,
        &dir,
    )?;

    let sample = PseudoData::generate(20, 5, config, config.seed.wrapping_add(1));
    let predictions = scorer.predict(sample.text.view(), sample.classes.view())?;
    let seen = scorer.evaluate(
        train.text.view(),
        train.classes.view(),
        train.labels.view(),
        false,
    )?;
    let fresh_data =
        PseudoData::generate(num_text, num_classes, config, config.seed.wrapping_add(2));
    let fresh = scorer.evaluate(
        fresh_data.text.view(),
        fresh_data.classes.view(),
        fresh_data.labels.view(),
        false,
    )?;

    match mode {
        OutputMode::Json => output_json(&serde_json::json!({
            "dataset": dataset,
            "predictions": predictions.outer_iter().map(|r| r.to_vec()).collect::<Vec<_>>(),
            "train": seen,
            "fresh": fresh,
        })),
        OutputMode::Human => {
            print_header("Predictions on 20 fresh documents");
            let headers: Vec<String> = std::iter::once("doc".to_string())
                .chain((0..predictions.ncols()).map(|j| format!("c{}", j)))
                .collect();
            let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
            print_table(&headers, prediction_rows(predictions.view()));
            print_stats("Training data", &seen, mode);
            print_stats("Fresh data", &fresh, mode);
        }
    }
    Ok(())
}
