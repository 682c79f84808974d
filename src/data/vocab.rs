//! Word/id vocabulary with reserved control ids.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Kg4TextError, Result};

pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;
pub const START_ID: u32 = 2;
pub const END_ID: u32 = 3;

const RESERVED: [&str; 4] = ["<pad>", "<unk>", "<s>", "</s>"];

/// Bidirectional word ↔ id map. Ids below [`Vocab::RESERVED_COUNT`] are the
/// control tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VocabFile", into = "VocabFile")]
pub struct Vocab {
    words: Vec<String>,
    index: HashMap<String, u32>,
}

#[derive(Serialize, Deserialize)]
struct VocabFile {
    words: Vec<String>,
}

impl TryFrom<VocabFile> for Vocab {
    type Error = Kg4TextError;

    fn try_from(file: VocabFile) -> Result<Self> {
        let reserved_ok = file.words.len() >= RESERVED.len()
            && file.words.iter().zip(RESERVED).all(|(w, r)| w == r);
        if !reserved_ok {
            return Err(Kg4TextError::Validation(
                "vocabulary must start with the reserved tokens".to_string(),
            ));
        }
        Ok(Self::from_words(file.words))
    }
}

impl From<Vocab> for VocabFile {
    fn from(vocab: Vocab) -> Self {
        Self { words: vocab.words }
    }
}

impl Vocab {
    pub const RESERVED_COUNT: usize = RESERVED.len();

    fn from_words(words: Vec<String>) -> Self {
        let index = words
            .iter()
            .enumerate()
            .map(|(id, w)| (w.clone(), id as u32))
            .collect();
        Self { words, index }
    }

    /// Build from tokenized documents, keeping the most frequent words so the
    /// vocabulary (reserved ids included) has at most `max_size` entries.
    /// Ties are broken alphabetically.
    pub fn build<'a, I, D>(documents: I, max_size: usize) -> Self
    where
        I: IntoIterator<Item = D>,
        D: IntoIterator<Item = &'a String>,
    {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for doc in documents {
            for word in doc {
                *counts.entry(word.as_str()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = counts
            .into_iter()
            .filter(|(w, _)| !RESERVED.contains(w))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let capacity = max_size.saturating_sub(RESERVED.len());
        let words = RESERVED
            .iter()
            .map(|w| w.to_string())
            .chain(ranked.into_iter().take(capacity).map(|(w, _)| w.to_string()))
            .collect();
        Self::from_words(words)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Id of `word`, or [`UNK_ID`].
    pub fn id(&self, word: &str) -> u32 {
        self.index.get(word).copied().unwrap_or(UNK_ID)
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    pub fn encode(&self, words: &[String]) -> Vec<u32> {
        words.iter().map(|w| self.id(w)).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(self)?)?;
        info!("Saved vocabulary ({} words) to {}", self.len(), path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let vocab: Vocab = serde_json::from_str(&contents)?;
        info!("Loaded vocabulary ({} words) from {}", vocab.len(), path.display());
        Ok(vocab)
    }
}
