use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::module::{ModuleState, TrainableModule};

/// Best-so-far selection on the validation photometric loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointPolicy;

impl CheckpointPolicy {
    /// Returns `(is_best, updated_best)`.
    ///
    /// The first validated epoch only sets the baseline and is never an
    /// improvement. Later epochs improve iff strictly below the best.
    pub fn decide(best: Option<f64>, current: f64) -> (bool, f64) {
        match best {
            None => (false, current),
            Some(best) => (current < best, best.min(current)),
        }
    }
}

/// Both models' state after one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    /// 0-based epoch index.
    pub epoch: usize,
    pub is_best: bool,
    pub depth: ModuleState,
    pub pose_mask: ModuleState,
}

/// On-disk shape of one model checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedModule {
    /// 1-based: the number of epochs completed.
    pub epoch: usize,
    pub state_dict: ModuleState,
}

/// Where checkpoints go.
pub trait CheckpointStore {
    fn save(&mut self, record: &CheckpointRecord) -> Result<()>;
}

/// Keeps every record in memory.
impl CheckpointStore for Vec<CheckpointRecord> {
    fn save(&mut self, record: &CheckpointRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

pub const DISP_PREFIX: &str = "dispnet";
pub const EXP_POSE_PREFIX: &str = "exp_pose";

/// Writes `<prefix>_checkpoint.json` for both models every epoch and copies
/// them to `<prefix>_model_best.json` on improvement.
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    dir: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> JsonCheckpointStore {
        JsonCheckpointStore { dir: dir.into() }
    }

    pub fn latest_path(&self, prefix: &str) -> PathBuf {
        self.dir.join(format!("{prefix}_checkpoint.json"))
    }

    pub fn best_path(&self, prefix: &str) -> PathBuf {
        self.dir.join(format!("{prefix}_model_best.json"))
    }

    fn write(&self, prefix: &str, saved: &SavedModule, is_best: bool) -> Result<()> {
        let latest = self.latest_path(prefix);
        let mut writer = BufWriter::new(File::create(&latest)?);
        serde_json::to_writer(&mut writer, saved)?;
        writer.flush()?;
        if is_best {
            fs::copy(&latest, self.best_path(prefix))?;
        }
        Ok(())
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn save(&mut self, record: &CheckpointRecord) -> Result<()> {
        let epoch = record.epoch + 1;
        self.write(
            DISP_PREFIX,
            &SavedModule {
                epoch,
                state_dict: record.depth.clone(),
            },
            record.is_best,
        )?;
        self.write(
            EXP_POSE_PREFIX,
            &SavedModule {
                epoch,
                state_dict: record.pose_mask.clone(),
            },
            record.is_best,
        )?;
        debug!("checkpoint for epoch {epoch} written to {}", self.dir.display());
        Ok(())
    }
}

pub fn read_saved(path: &Path) -> Result<SavedModule> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Loads weights saved by `JsonCheckpointStore` into `module`.
/// Returns the epoch count stored with them.
pub fn load_pretrained<M: TrainableModule + ?Sized>(module: &mut M, path: &Path) -> Result<usize> {
    let saved = read_saved(path)?;
    module.load_state(&saved.state_dict)?;
    info!(
        "=> using pre-trained weights for {} from {} (epoch {})",
        module.name(),
        path.display(),
        saved.epoch
    );
    Ok(saved.epoch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn first_epoch_sets_baseline_only() {
        assert_eq!(CheckpointPolicy::decide(None, 0.8), (false, 0.8));
    }

    #[test]
    fn best_tracks_strict_improvement() {
        let mut best = None;
        let mut flags = Vec::new();
        let mut bests = Vec::new();
        for photo in [0.8, 0.6, 0.7, 0.5] {
            let (is_best, updated) = CheckpointPolicy::decide(best, photo);
            best = Some(updated);
            flags.push(is_best);
            bests.push(updated);
        }
        assert_eq!(flags, vec![false, true, false, true]);
        assert_eq!(bests, vec![0.8, 0.6, 0.6, 0.5]);
        // Equal is not an improvement.
        assert_eq!(CheckpointPolicy::decide(Some(0.5), 0.5), (false, 0.5));
    }

    fn state(v: f64) -> ModuleState {
        ModuleState(BTreeMap::from([("w".to_string(), vec![v])]))
    }

    #[test]
    fn json_store_writes_latest_and_best() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonCheckpointStore::new(dir.path());
        store
            .save(&CheckpointRecord {
                epoch: 0,
                is_best: false,
                depth: state(1.0),
                pose_mask: state(2.0),
            })
            .unwrap();
        assert!(!store.best_path(DISP_PREFIX).exists());

        store
            .save(&CheckpointRecord {
                epoch: 1,
                is_best: true,
                depth: state(3.0),
                pose_mask: state(4.0),
            })
            .unwrap();
        let best = read_saved(&store.best_path(EXP_POSE_PREFIX)).unwrap();
        assert_eq!(best.epoch, 2);
        assert_eq!(best.state_dict, state(4.0));
        let latest = read_saved(&store.latest_path(DISP_PREFIX)).unwrap();
        assert_eq!(latest.state_dict, state(3.0));
    }
}
