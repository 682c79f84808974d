//! Corpus, vocabulary and knowledge inputs, and minibatch construction.

pub mod knowledge;
pub mod loader;
pub mod sampler;
pub mod vocab;

use serde::{Deserialize, Serialize};

pub use knowledge::{ClassDict, KgVectorDict, KnowledgeBase};
pub use sampler::{
    CategoryPolicy, FixedCategory, IterationOrder, Minibatch, MinibatchSampler, UniformCategory,
};
pub use vocab::Vocab;

/// A tokenized document and its class code. `tokens.len()` is the true
/// length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub tokens: Vec<u32>,
    pub class: String,
}
