//! Epoch ordering, exact-size minibatches and knowledge-vector assembly.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::knowledge::KnowledgeBase;
use super::vocab::PAD_ID;
use super::Document;
use crate::config::CategoryPolicyKind;

/// Chooses the category flag of each instance: 1 presents the instance's own
/// class, 0 presents a different one.
pub trait CategoryPolicy: Send {
    fn flag(&self, rng: &mut StdRng) -> u8;
}

/// Fair coin.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformCategory;

impl CategoryPolicy for UniformCategory {
    fn flag(&self, rng: &mut StdRng) -> u8 {
        rng.gen_range(0..=1)
    }
}

/// Always the same flag.
#[derive(Debug, Clone, Copy)]
pub struct FixedCategory(pub u8);

impl CategoryPolicy for FixedCategory {
    fn flag(&self, _rng: &mut StdRng) -> u8 {
        self.0
    }
}

impl From<CategoryPolicyKind> for Box<dyn CategoryPolicy> {
    fn from(kind: CategoryPolicyKind) -> Self {
        match kind {
            CategoryPolicyKind::Uniform => Box::new(UniformCategory),
            CategoryPolicyKind::Positive => Box::new(FixedCategory(1)),
            CategoryPolicyKind::Negative => Box::new(FixedCategory(0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOrder {
    /// Reshuffled at every epoch (training).
    Shuffled,
    /// Corpus order (evaluation and inference).
    Sequential,
}

/// Host-side tensors of one minibatch, rows padded to a common width.
#[derive(Debug, Clone, PartialEq)]
pub struct Minibatch {
    /// Truncated token ids per row, without padding.
    pub sequences: Vec<Vec<u32>>,
    /// `rows × width` token ids padded with PAD.
    pub tokens: Vec<u32>,
    pub lengths: Vec<usize>,
    /// `rows × width × kg_dim` knowledge vectors, zero on padding.
    pub knowledge: Vec<f32>,
    /// Category flag per row.
    pub categories: Vec<u8>,
    /// Class each row was conditioned on; `None` when no candidate existed.
    pub candidates: Vec<Option<String>>,
    pub width: usize,
    pub kg_dim: usize,
}

impl Minibatch {
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }
}

pub struct MinibatchSampler {
    batch_size: usize,
    max_seq_len: usize,
    policy: Box<dyn CategoryPolicy>,
    rng: StdRng,
}

impl MinibatchSampler {
    pub fn new(
        batch_size: usize,
        max_seq_len: usize,
        policy: Box<dyn CategoryPolicy>,
        seed: u64,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_seq_len,
            policy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Index lists of the `floor(n / batch_size)` full minibatches of one
    /// epoch; trailing instances are dropped.
    pub fn epoch_plan(&mut self, n: usize, order: IterationOrder) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..n).collect();
        if order == IterationOrder::Shuffled {
            indices.shuffle(&mut self.rng);
        }
        indices
            .chunks_exact(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    /// Class presented to an instance of `true_class` under `flag`.
    fn candidate(&mut self, true_class: &str, flag: u8, kb: &KnowledgeBase) -> Option<String> {
        if flag == 1 {
            return Some(true_class.to_string());
        }
        let others: Vec<&str> = kb
            .classes()
            .codes()
            .into_iter()
            .filter(|c| *c != true_class)
            .collect();
        others.choose(&mut self.rng).map(|c| c.to_string())
    }

    /// Build the aligned minibatch for `documents[indices]`.
    pub fn assemble(
        &mut self,
        documents: &[Document],
        indices: &[usize],
        kb: &KnowledgeBase,
    ) -> Minibatch {
        let rows: Vec<&Document> = indices.iter().map(|&i| &documents[i]).collect();
        self.assemble_rows(&rows, kb)
    }

    /// Minibatch holding a single document.
    pub fn single(&mut self, document: &Document, kb: &KnowledgeBase) -> Minibatch {
        self.assemble_rows(&[document], kb)
    }

    fn assemble_rows(&mut self, rows: &[&Document], kb: &KnowledgeBase) -> Minibatch {
        let kg_dim = kb.dim();
        let sequences: Vec<Vec<u32>> = rows
            .iter()
            .map(|d| d.tokens.iter().take(self.max_seq_len).copied().collect())
            .collect();
        let lengths: Vec<usize> = sequences.iter().map(Vec::len).collect();
        let width = lengths.iter().copied().max().unwrap_or(0).max(1);

        let mut tokens = vec![PAD_ID; rows.len() * width];
        let mut knowledge = vec![0f32; rows.len() * width * kg_dim];
        let mut categories = Vec::with_capacity(rows.len());
        let mut candidates = Vec::with_capacity(rows.len());

        for (row, (doc, seq)) in rows.iter().zip(&sequences).enumerate() {
            let flag = self.policy.flag(&mut self.rng);
            let candidate = self.candidate(&doc.class, flag, kb);

            for (pos, &token) in seq.iter().enumerate() {
                tokens[row * width + pos] = token;
                let Some(class) = candidate.as_deref() else {
                    continue;
                };
                if let Some(vector) = kb.knowledge_vector(token, class) {
                    let start = (row * width + pos) * kg_dim;
                    knowledge[start..start + kg_dim].copy_from_slice(&vector);
                }
            }
            categories.push(flag);
            candidates.push(candidate);
        }

        Minibatch {
            sequences,
            tokens,
            lengths,
            knowledge,
            categories,
            candidates,
            width,
            kg_dim,
        }
    }
}
