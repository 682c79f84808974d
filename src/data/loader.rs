//! Readers for the corpus, class dictionary and KG vector files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use super::knowledge::{ClassDict, KgVectorDict};
use super::vocab::Vocab;
use super::Document;
use crate::{Kg4TextError, Result};

/// One row of the corpus CSV.
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusRecord {
    pub text: String,
    pub class: String,
}

#[derive(Debug, Deserialize)]
struct ClassRecord {
    #[serde(rename = "ClassCode")]
    code: String,
    #[serde(rename = "ConceptNet")]
    concept: String,
}

/// Lowercase and split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn read_corpus(path: &Path) -> Result<Vec<CorpusRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<CorpusRecord>, _>>()?;
    info!("Read {} documents from {}", records.len(), path.display());
    Ok(records)
}

pub fn read_class_dict(path: &Path) -> Result<ClassDict> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut dict = ClassDict::new();
    for record in reader.deserialize() {
        let ClassRecord { code, concept } = record?;
        dict.insert(code, concept);
    }
    info!("Read {} classes from {}", dict.len(), path.display());
    Ok(dict)
}

/// Read whitespace-separated `concept v1 ... vK` lines. A leading
/// `count dim` header line is skipped.
pub fn read_kg_vectors(path: &Path, dim: usize) -> Result<KgVectorDict> {
    let reader = BufReader::new(File::open(path)?);
    let mut dict = KgVectorDict::new(dim);

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if line_no == 0 && fields.len() == 2 && fields.iter().all(|f| f.parse::<usize>().is_ok()) {
            continue;
        }
        let (concept, values) = fields.split_first().ok_or_else(|| {
            Kg4TextError::Validation(format!("{}:{}: empty line", path.display(), line_no + 1))
        })?;
        let vector = values
            .iter()
            .map(|v| v.parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                Kg4TextError::Validation(format!(
                    "{}:{}: bad value: {}",
                    path.display(),
                    line_no + 1,
                    e
                ))
            })?;
        dict.insert(*concept, vector).map_err(|e| {
            Kg4TextError::Validation(format!("{}:{}: {}", path.display(), line_no + 1, e))
        })?;
    }

    if dict.is_empty() {
        warn!("No KG vectors found in {}", path.display());
    } else {
        info!("Read {} KG vectors from {}", dict.len(), path.display());
    }
    Ok(dict)
}

/// Tokenize corpus rows and map them through `vocab`.
pub fn to_documents(records: &[CorpusRecord], vocab: &Vocab) -> Vec<Document> {
    records
        .iter()
        .map(|r| Document {
            tokens: vocab.encode(&tokenize(&r.text)),
            class: r.class.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("The River-bank, 2 boats!"),
            vec!["the", "river", "bank", "2", "boats"]
        );
        assert!(tokenize("  ,. ").is_empty());
    }

    #[test]
    fn test_read_corpus_and_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "train.csv", "class,text\n1,\"a river bank\"\n2,money bank\n");
        let records = read_corpus(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].class, "1");

        let tokenized: Vec<Vec<String>> = records.iter().map(|r| tokenize(&r.text)).collect();
        let vocab = Vocab::build(&tokenized, 100);
        let docs = to_documents(&records, &vocab);
        assert_eq!(docs[0].tokens.len(), 3);
        assert_eq!(docs[1].tokens[1], vocab.id("bank"));
    }

    #[test]
    fn test_read_class_dict() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "classes.csv",
            "ClassCode,ConceptNet\n2,/c/en/money\n1,/c/en/water\n",
        );
        let dict = read_class_dict(&path).unwrap();
        assert_eq!(dict.codes(), vec!["1", "2"]);
        assert_eq!(dict.concept("2"), Some("/c/en/money"));
    }

    #[test]
    fn test_read_kg_vectors_skips_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "kg.txt", "2 3\nriver 0.1 0.2 0.3\nbank  1 2 3\n\n");
        let dict = read_kg_vectors(&path, 3).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get("bank"), Some(&[1.0f32, 2.0, 3.0][..]));
    }

    #[test]
    fn test_read_kg_vectors_rejects_wrong_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "kg.txt", "river 0.1 0.2\n");
        assert!(matches!(
            read_kg_vectors(&path, 3),
            Err(Kg4TextError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_column_is_csv_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "bad.csv", "label,body\n1,x\n");
        assert!(matches!(read_corpus(&path), Err(Kg4TextError::Csv(_))));
    }
}
