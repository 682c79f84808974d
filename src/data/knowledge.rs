//! Class dictionary and knowledge-graph vectors.

use std::collections::{BTreeMap, HashMap};

use ndarray::Array2;

use super::vocab::Vocab;
use crate::utils::math::vector_multiply;
use crate::{Kg4TextError, Result};

/// Class code → knowledge-graph concept, iterated in code order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassDict {
    concepts: BTreeMap<String, String>,
}

impl ClassDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: impl Into<String>, concept: impl Into<String>) {
        self.concepts.insert(code.into(), concept.into());
    }

    pub fn concept(&self, code: &str) -> Option<&str> {
        self.concepts.get(code).map(String::as_str)
    }

    /// Class codes in sorted order.
    pub fn codes(&self) -> Vec<&str> {
        self.concepts.keys().map(String::as_str).collect()
    }

    /// Position of `code` in [`ClassDict::codes`].
    pub fn position(&self, code: &str) -> Option<usize> {
        self.concepts.keys().position(|c| c == code)
    }

    /// One row per entry of `classes`, with a 1 in the column of its code.
    /// Unknown codes give an all-zero row.
    pub fn one_hot<'a>(&self, classes: impl IntoIterator<Item = &'a str>) -> Array2<u8> {
        let rows: Vec<Option<usize>> = classes.into_iter().map(|c| self.position(c)).collect();
        let mut labels = Array2::zeros((rows.len(), self.len()));
        for (row, column) in rows.into_iter().enumerate() {
            if let Some(column) = column {
                labels[[row, column]] = 1;
            }
        }
        labels
    }

    /// One row per class (sorted by code) holding the vector of its concept;
    /// zeros for classes without a vector.
    pub fn class_matrix(&self, vectors: &KgVectorDict) -> Array2<f32> {
        let mut matrix = Array2::zeros((self.len(), vectors.dim()));
        for (row, concept) in self.concepts.values().enumerate() {
            if let Some(vector) = vectors.get(concept) {
                matrix
                    .row_mut(row)
                    .iter_mut()
                    .zip(vector)
                    .for_each(|(dst, &src)| *dst = src);
            }
        }
        matrix
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ClassDict {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut dict = Self::new();
        for (code, concept) in iter {
            dict.insert(code, concept);
        }
        dict
    }
}

/// Concept → fixed-width vector.
#[derive(Debug, Clone, PartialEq)]
pub struct KgVectorDict {
    dim: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl KgVectorDict {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: HashMap::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn insert(&mut self, concept: impl Into<String>, vector: Vec<f32>) -> Result<()> {
        let concept = concept.into();
        if vector.len() != self.dim {
            return Err(Kg4TextError::Validation(format!(
                "vector for '{}' has {} values, expected {}",
                concept,
                vector.len(),
                self.dim
            )));
        }
        self.vectors.insert(concept, vector);
        Ok(())
    }

    pub fn get(&self, concept: &str) -> Option<&[f32]> {
        self.vectors.get(concept).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Class dictionary and KG vectors, with word vectors resolved per vocabulary
/// id up front.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    classes: ClassDict,
    vectors: KgVectorDict,
    token_vectors: HashMap<u32, Vec<f32>>,
}

impl KnowledgeBase {
    pub fn new(classes: ClassDict, vectors: KgVectorDict, vocab: &Vocab) -> Self {
        let token_vectors = (Vocab::RESERVED_COUNT as u32..vocab.len() as u32)
            .filter_map(|id| {
                let word = vocab.word(id)?;
                vectors.get(word).map(|v| (id, v.to_vec()))
            })
            .collect();
        Self {
            classes,
            vectors,
            token_vectors,
        }
    }

    pub fn classes(&self) -> &ClassDict {
        &self.classes
    }

    pub fn dim(&self) -> usize {
        self.vectors.dim()
    }

    /// KG vector of a class's concept.
    pub fn class_vector(&self, code: &str) -> Option<&[f32]> {
        self.classes
            .concept(code)
            .and_then(|concept| self.vectors.get(concept))
    }

    /// `kg[word] ⊙ kg[concept(class)]`, or `None` when either side is missing.
    pub fn knowledge_vector(&self, token: u32, class: &str) -> Option<Vec<f32>> {
        let word = self.token_vectors.get(&token)?;
        let concept = self.class_vector(class)?;
        Some(vector_multiply(word, concept))
    }

    /// [`ClassDict::class_matrix`] over this base's vectors.
    pub fn class_matrix(&self) -> Array2<f32> {
        self.classes.class_matrix(&self.vectors)
    }
}
