//! CLI command handlers.

pub mod bilinear;
pub mod encoder;

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::data::loader::{
    read_class_dict, read_corpus, read_kg_vectors, to_documents, tokenize, CorpusRecord,
};
use crate::data::{ClassDict, Document, KnowledgeBase, Vocab};
use crate::Kg4TextError;

/// Everything an encoder command needs from disk.
pub struct CorpusInputs {
    pub documents: Vec<Document>,
    pub knowledge: KnowledgeBase,
}

/// Load the vocabulary at `vocab_path`, or build it from `records` and save
/// it there.
pub fn load_or_build_vocab(
    vocab_path: &Path,
    records: &[CorpusRecord],
    config: &Config,
) -> Result<Vocab> {
    if vocab_path.exists() {
        let vocab = Vocab::load(vocab_path)
            .with_context(|| format!("Failed to load vocabulary {}", vocab_path.display()))?;
        if vocab.len() > config.encoder.vocab_size {
            return Err(Kg4TextError::Config(format!(
                "vocabulary {} has {} words but encoder.vocab_size is {}",
                vocab_path.display(),
                vocab.len(),
                config.encoder.vocab_size
            ))
            .into());
        }
        return Ok(vocab);
    }
    let tokenized: Vec<Vec<String>> = records.iter().map(|r| tokenize(&r.text)).collect();
    let vocab = Vocab::build(&tokenized, config.encoder.vocab_size);
    vocab.save(vocab_path)?;
    Ok(vocab)
}

pub fn load_corpus_inputs(
    corpus: &Path,
    classes: &Path,
    kg_vectors: &Path,
    vocab_path: &Path,
    config: &Config,
) -> Result<CorpusInputs> {
    let records = read_corpus(corpus)
        .with_context(|| format!("Failed to read corpus {}", corpus.display()))?;
    let class_dict = read_classes(classes)?;
    let vectors = read_kg_vectors(kg_vectors, config.encoder.kg_vector_dim)
        .with_context(|| format!("Failed to read KG vectors {}", kg_vectors.display()))?;
    let vocab = load_or_build_vocab(vocab_path, &records, config)?;
    let documents = to_documents(&records, &vocab);
    let knowledge = KnowledgeBase::new(class_dict, vectors, &vocab);
    Ok(CorpusInputs {
        documents,
        knowledge,
    })
}

pub fn read_classes(path: &Path) -> Result<ClassDict> {
    read_class_dict(path)
        .with_context(|| format!("Failed to read class dictionary {}", path.display()))
}
