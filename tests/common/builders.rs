//! On-disk fixtures for corpus, class dictionary and KG vector files.
//!
//! Two classes with disjoint vocabularies so a tiny encoder can separate them.

use std::fs;
use std::path::{Path, PathBuf};

use kg4text::config::{Config, EncoderConfig};
use tempfile::TempDir;

const WATER_TEXTS: [&str; 3] = [
    "The river flows past the bank",
    "Rain filled the lake overnight",
    "A river and a lake",
];

const MONEY_TEXTS: [&str; 3] = [
    "The bank lent coins to traders",
    "Coins and cash in the vault",
    "Cash flows into the vault",
];

/// Encoder and training settings small enough to run in tests.
pub fn tiny_config() -> Config {
    let mut config = Config::default();
    config.encoder = EncoderConfig {
        model_name: "fixture".to_string(),
        vocab_size: 64,
        embedding_dim: 4,
        hidden_dim: 3,
        kg_vector_dim: 2,
        max_seq_len: 8,
        ..Default::default()
    };
    config.training.batch_size = 2;
    config.training.log_every = 1;
    config.training.start_learning_rate = 1e-2;
    config.bilinear.batch_size = 2;
    config.bilinear.n_epoch = 3;
    config.bilinear.learning_rate = 1e-2;
    config
}

/// Builder for a corpus directory in a temp dir.
pub struct CorpusFixture {
    documents: usize,
    header: bool,
}

/// Paths of a written fixture; files live as long as `dir`.
pub struct CorpusFiles {
    pub dir: TempDir,
    pub corpus: PathBuf,
    pub classes: PathBuf,
    pub kg_vectors: PathBuf,
}

impl CorpusFiles {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

impl CorpusFixture {
    /// `documents` rows alternating between class 1 (water) and 2 (money).
    pub fn new(documents: usize) -> Self {
        Self {
            documents,
            header: false,
        }
    }

    /// Prefix the KG vector file with a `count dim` line.
    pub fn with_vector_header(mut self) -> Self {
        self.header = true;
        self
    }

    pub fn write(self) -> CorpusFiles {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.csv");
        let classes = dir.path().join("classes.csv");
        let kg_vectors = dir.path().join("kg.txt");

        let mut writer = csv::Writer::from_path(&corpus).unwrap();
        writer.write_record(["text", "class"]).unwrap();
        for i in 0..self.documents {
            let (texts, class) = if i % 2 == 0 {
                (&WATER_TEXTS, "1")
            } else {
                (&MONEY_TEXTS, "2")
            };
            writer
                .write_record([texts[(i / 2) % texts.len()], class])
                .unwrap();
        }
        writer.flush().unwrap();

        fs::write(&classes, "ClassCode,ConceptNet\n1,water\n2,money\n").unwrap();

        let mut vectors = String::new();
        if self.header {
            vectors.push_str("8 2\n");
        }
        for (word, v) in [
            ("water", "1.0 0.0"),
            ("money", "0.0 1.0"),
            ("river", "0.9 0.1"),
            ("lake", "0.8 0.2"),
            ("rain", "0.7 0.0"),
            ("coins", "0.1 0.9"),
            ("cash", "0.0 0.8"),
            ("vault", "0.2 0.7"),
        ] {
            vectors.push_str(&format!("{} {}\n", word, v));
        }
        fs::write(&kg_vectors, vectors).unwrap();

        CorpusFiles {
            dir,
            corpus,
            classes,
            kg_vectors,
        }
    }
}
