//! Per-epoch training log persisted as JSON.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    /// `None` when the pass had no complete minibatch.
    pub train_loss: Option<f32>,
    pub test_loss: Option<f32>,
    pub learning_rate: f64,
    pub global_step: u64,
    pub elapsed_secs: f64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub records: Vec<EpochRecord>,
}

impl TrainingHistory {
    /// Existing history at `path`, or an empty one.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Append `record`, replacing any earlier record of the same epoch (a
    /// resumed run overwrites what it re-trains).
    pub fn record(&mut self, record: EpochRecord) {
        self.records.retain(|r| r.epoch != record.epoch);
        self.records.push(record);
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, loss: f32) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: Some(loss),
            test_loss: None,
            learning_rate: 1e-4,
            global_step: epoch as u64 * 10,
            elapsed_secs: 1.5,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("history.json");
        let mut history = TrainingHistory::default();
        history.record(record(1, 0.7));
        history.record(record(2, 0.5));
        history.save(&path).unwrap();

        let loaded = TrainingHistory::load_or_default(&path).unwrap();
        assert_eq!(loaded, history);
        assert_eq!(loaded.last().map(|r| r.epoch), Some(2));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = TrainingHistory::load_or_default(&dir.path().join("none.json")).unwrap();
        assert!(history.records.is_empty());
    }

    #[test]
    fn test_rerun_epoch_replaces_record() {
        let mut history = TrainingHistory::default();
        history.record(record(1, 0.7));
        history.record(record(1, 0.4));
        assert_eq!(history.records.len(), 1);
        assert_eq!(history.records[0].train_loss, Some(0.4));
    }
}
