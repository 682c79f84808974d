//! Epoch loop, held-out evaluation, checkpointing and inference for the
//! knowledge-aware text model.

use std::time::Instant;

use candle_core::{Device, Tensor};
use chrono::Utc;
use tracing::{info, warn};

use super::checkpoint::{
    prune_checkpoints, restore_snapshot, restore_training_checkpoint, save_snapshot,
    save_training_checkpoint, CheckpointPaths,
};
use super::history::{EpochRecord, TrainingHistory};
use crate::config::{Config, RestoreFormat, TrainingConfig};
use crate::data::{Document, IterationOrder, KnowledgeBase, MinibatchSampler};
use crate::models::{KgBatch, KgTextModel};
use crate::nn::{Adam, AdamParams, ExponentialDecay, Mode};
use crate::{Kg4TextError, Result};

/// Lifecycle of a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Restoring,
    /// Restored and waiting for the next pass.
    Ready,
    TrainingEpoch,
    EvaluatingEpoch,
    Inferring,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Train,
    Test,
    Infer,
}

impl Pass {
    fn label(self) -> &'static str {
        match self {
            Pass::Train => "Train",
            Pass::Test => "Test",
            Pass::Infer => "Infer",
        }
    }

    fn state(self) -> ControllerState {
        match self {
            Pass::Train => ControllerState::TrainingEpoch,
            Pass::Test => ControllerState::EvaluatingEpoch,
            Pass::Infer => ControllerState::Inferring,
        }
    }
}

/// Result of one pass over a document set.
#[derive(Debug)]
pub struct EpochReport {
    /// Mean minibatch loss; `None` when no complete minibatch existed.
    pub mean_loss: Option<f32>,
    pub steps: usize,
    /// Encoder states of the covered documents (inference passes only).
    pub states: Option<Tensor>,
}

/// Owns the model, its optimizer and the sampler, and drives training and
/// inference one pass at a time.
pub struct Controller {
    model: KgTextModel,
    optimizer: Adam,
    schedule: ExponentialDecay,
    sampler: MinibatchSampler,
    paths: CheckpointPaths,
    config: TrainingConfig,
    base_epoch: Option<usize>,
    global_step: u64,
    history: TrainingHistory,
    state: ControllerState,
}

impl Controller {
    /// Build the model and restore `base_epoch` if given.
    ///
    /// `None` starts from fresh parameters; the first trained epoch is then 0.
    pub fn new(
        config: &Config,
        paths: CheckpointPaths,
        base_epoch: Option<usize>,
        device: &Device,
    ) -> Result<Self> {
        let training = config.training.clone();
        let model = KgTextModel::new(&config.encoder, device)?;
        let optimizer = Adam::new(
            model.varmap(),
            AdamParams {
                learning_rate: training.start_learning_rate,
                beta1: training.beta1,
                beta2: training.beta2,
                epsilon: training.epsilon,
            },
        )?;
        let schedule = ExponentialDecay {
            start: training.start_learning_rate,
            decay_rate: training.decay_rate,
            decay_steps: training.decay_steps,
        };
        let sampler = MinibatchSampler::new(
            training.batch_size,
            config.encoder.max_seq_len,
            training.category_policy.into(),
            training.seed,
        );
        paths.create_dirs()?;
        let history = TrainingHistory::load_or_default(&paths.history())?;

        let mut controller = Self {
            model,
            optimizer,
            schedule,
            sampler,
            paths,
            config: training,
            base_epoch,
            global_step: 0,
            history,
            state: ControllerState::Uninitialized,
        };
        controller.restore()?;
        Ok(controller)
    }

    fn restore(&mut self) -> Result<()> {
        self.state = ControllerState::Restoring;
        match self.base_epoch {
            None => info!("No base epoch, starting from fresh parameters"),
            Some(epoch) => match self.config.restore_from {
                RestoreFormat::Checkpoint => {
                    let meta = restore_training_checkpoint(
                        &self.paths,
                        epoch,
                        self.model.varmap(),
                        &mut self.optimizer,
                    )?;
                    if let Some(meta) = meta {
                        self.global_step = meta.global_step;
                    }
                }
                RestoreFormat::Snapshot => {
                    let report =
                        restore_snapshot(&self.paths.snapshot(epoch), self.model.varmap())?;
                    if !report.missing.is_empty() {
                        warn!("{} snapshot tensors were not restored", report.missing.len());
                    }
                }
            },
        }
        self.state = ControllerState::Ready;
        Ok(())
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn model(&self) -> &KgTextModel {
        &self.model
    }

    pub fn paths(&self) -> &CheckpointPaths {
        &self.paths
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            ControllerState::Ready => Ok(()),
            ControllerState::Closed => Err(Kg4TextError::InvalidState(
                "controller is closed".to_string(),
            )),
            other => Err(Kg4TextError::InvalidState(format!(
                "controller is busy ({:?})",
                other
            ))),
        }
    }

    fn run_pass(
        &mut self,
        epoch: usize,
        documents: &[Document],
        kb: &KnowledgeBase,
        pass: Pass,
    ) -> Result<EpochReport> {
        self.ensure_ready()?;
        self.state = pass.state();
        let result = self.run_pass_inner(epoch, documents, kb, pass);
        self.state = ControllerState::Ready;
        result
    }

    fn run_pass_inner(
        &mut self,
        epoch: usize,
        documents: &[Document],
        kb: &KnowledgeBase,
        pass: Pass,
    ) -> Result<EpochReport> {
        let order = match pass {
            Pass::Train => IterationOrder::Shuffled,
            Pass::Test | Pass::Infer => IterationOrder::Sequential,
        };
        let plan = self.sampler.epoch_plan(documents.len(), order);
        let steps = plan.len();
        if steps == 0 {
            warn!(
                "[{}] Epoch: [{:3}] {} documents do not fill one minibatch of {}",
                pass.label(),
                epoch,
                documents.len(),
                self.sampler.batch_size()
            );
            return Ok(EpochReport {
                mean_loss: None,
                steps: 0,
                states: None,
            });
        }

        let device = self.model.device().clone();
        let log_every = self.config.log_every.max(1);
        let start = Instant::now();
        let mut step_time = Instant::now();
        let mut total_loss = 0f32;
        let mut states = Vec::new();
        let mut learning_rate = self.optimizer.learning_rate();

        for (step, indices) in plan.iter().enumerate() {
            let minibatch = self.sampler.assemble(documents, indices, kb);
            let batch = KgBatch::from_minibatch(&minibatch, &device)?;

            match pass {
                Pass::Train => {
                    let global_step = (step + epoch * steps) as u64;
                    learning_rate = self.schedule.learning_rate(global_step);
                    self.optimizer.set_learning_rate(learning_rate);
                    let loss = self.model.loss(&batch, Mode::Train)?;
                    self.optimizer.backward_step(&loss)?;
                    total_loss += loss.to_scalar::<f32>()?;
                    self.global_step = global_step;
                }
                Pass::Test => {
                    let loss = self.model.loss(&batch, Mode::Eval)?;
                    total_loss += loss.to_scalar::<f32>()?;
                }
                Pass::Infer => states.push(self.model.text_state(&batch)?),
            }

            if step > 0 && step % log_every == 0 && pass != Pass::Infer {
                info!(
                    "[{}] Epoch: [{:3}][{:4}/{:4}] time: {:.4}, lr: {:.8}, loss: {:.6}",
                    pass.label(),
                    epoch,
                    step,
                    steps,
                    step_time.elapsed().as_secs_f64(),
                    learning_rate,
                    total_loss / (step + 1) as f32
                );
                step_time = Instant::now();
            }
        }

        let (mean_loss, states) = match pass {
            Pass::Infer => (None, Some(Tensor::cat(&states, 0)?)),
            _ => (Some(total_loss / steps as f32), None),
        };
        match mean_loss {
            Some(loss) => info!(
                "[{} Sum] Epoch: [{:3}] time: {:.4}, lr: {:.8}, loss: {:.6}",
                pass.label(),
                epoch,
                start.elapsed().as_secs_f64(),
                learning_rate,
                loss
            ),
            None => info!(
                "[{} Sum] Epoch: [{:3}] time: {:.4}, {} minibatches",
                pass.label(),
                epoch,
                start.elapsed().as_secs_f64(),
                steps
            ),
        }
        Ok(EpochReport {
            mean_loss,
            steps,
            states,
        })
    }

    /// Shuffled, optimizing pass over `documents`.
    pub fn train_epoch(
        &mut self,
        epoch: usize,
        documents: &[Document],
        kb: &KnowledgeBase,
    ) -> Result<EpochReport> {
        self.run_pass(epoch, documents, kb, Pass::Train)
    }

    /// Sequential pass that only measures the loss.
    pub fn evaluate_epoch(
        &mut self,
        epoch: usize,
        documents: &[Document],
        kb: &KnowledgeBase,
    ) -> Result<EpochReport> {
        self.run_pass(epoch, documents, kb, Pass::Test)
    }

    /// Train for `train_epoch + 1` epochs after the base epoch.
    ///
    /// The last `ceil(N * holdout_fraction)` documents are held out for the
    /// per-epoch test pass. A checkpoint and a snapshot are written after
    /// every epoch.
    pub fn train(
        &mut self,
        documents: &[Document],
        kb: &KnowledgeBase,
        train_epoch: usize,
    ) -> Result<Vec<EpochRecord>> {
        self.ensure_ready()?;
        let holdout = (documents.len() as f64 * self.config.holdout_fraction).ceil() as usize;
        let split = documents.len() - holdout.min(documents.len());
        let (train_docs, test_docs) = documents.split_at(split);
        info!(
            "Training on {} documents, holding out {}",
            train_docs.len(),
            test_docs.len()
        );

        let first_epoch = self.base_epoch.map_or(0, |e| e + 1);
        let mut records = Vec::with_capacity(train_epoch + 1);
        for epoch in first_epoch..=first_epoch + train_epoch {
            let started = Instant::now();
            let train = self.train_epoch(epoch, train_docs, kb)?;
            let test = self.evaluate_epoch(epoch, test_docs, kb)?;

            save_training_checkpoint(
                &self.paths,
                epoch,
                self.global_step,
                self.model.varmap(),
                &self.optimizer,
            )?;
            prune_checkpoints(&self.paths, self.config.keep_checkpoints)?;
            if self.config.save_snapshot {
                save_snapshot(&self.paths.snapshot(epoch), self.model.varmap())?;
            }
            self.base_epoch = Some(epoch);

            let record = EpochRecord {
                epoch,
                train_loss: train.mean_loss,
                test_loss: test.mean_loss,
                learning_rate: self.optimizer.learning_rate(),
                global_step: self.global_step,
                elapsed_secs: started.elapsed().as_secs_f64(),
                finished_at: Utc::now(),
            };
            self.history.record(record.clone());
            self.history.save(&self.paths.history())?;
            records.push(record);
        }
        Ok(records)
    }

    /// Encoder states for every document, `N × hidden_dim`, in input order.
    ///
    /// Full minibatches go through the sequential pass; the remainder is
    /// encoded one document at a time through the same sampler path.
    pub fn infer(&mut self, documents: &[Document], kb: &KnowledgeBase) -> Result<Tensor> {
        let epoch = match self.base_epoch {
            Some(epoch) if epoch > 0 => epoch,
            _ => {
                return Err(Kg4TextError::InvalidState(
                    "inference needs a trained base epoch greater than 0".to_string(),
                ))
            }
        };
        let report = self.run_pass(epoch, documents, kb, Pass::Infer)?;
        let hidden_dim = self.model.hidden_dim();
        let device = self.model.device().clone();

        let mut parts = Vec::new();
        let covered = match report.states {
            Some(states) => {
                let rows = states.dim(0)?;
                parts.push(states);
                rows
            }
            None => 0,
        };

        self.ensure_ready()?;
        self.state = ControllerState::Inferring;
        let remainder: Result<Vec<Tensor>> = documents[covered..]
            .iter()
            .map(|doc| {
                let minibatch = self.sampler.single(doc, kb);
                let batch = KgBatch::from_minibatch(&minibatch, &device)?;
                Ok(self.model.text_state(&batch)?)
            })
            .collect();
        self.state = ControllerState::Ready;
        parts.extend(remainder?);

        let states = if parts.is_empty() {
            Tensor::zeros((0, hidden_dim), candle_core::DType::F32, &device)?
        } else {
            Tensor::cat(&parts, 0)?
        };
        let dims = states.dims2()?;
        if dims != (documents.len(), hidden_dim) {
            return Err(Kg4TextError::ShapeMismatch(format!(
                "inference produced {:?}, expected ({}, {})",
                dims,
                documents.len(),
                hidden_dim
            )));
        }
        info!("Text state {:?}", dims);
        Ok(states)
    }

    /// Release the model; every later operation fails.
    pub fn close(&mut self) {
        self.state = ControllerState::Closed;
    }
}
