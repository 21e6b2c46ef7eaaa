// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder.
//
// File naming convention:
//   <ckpt_dir>/
//     model_epoch_1.mpk.gz   ← weights after epoch 1
//     model_epoch_2.mpk.gz
//     ...
//     latest_epoch.json      ← number of the latest epoch
//     run_config.json        ← RunConfig of the training run
//
// Records are backend-agnostic: weights saved from the
// autodiff training model load into the inference backend.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::domain::config::RunConfig;

const RECORD_EXTENSION: &str = ".mpk.gz";

/// RunConfig of the training run, next to its checkpoints.
pub const RUN_CONFIG_FILE: &str = "run_config.json";

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<String>) -> Result<Self> {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint dir '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Write `model_epoch_{epoch}` and point latest_epoch.json at it.
    pub fn save_model<B: Backend, M: Module<B>>(&self, model: &M, epoch: usize) -> Result<()> {
        let path = self.dir.join(format!("model_epoch_{epoch}"));

        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| {
                format!("Failed to save checkpoint to '{}'", path.display())
            })?;

        let latest_path = self.dir.join("latest_epoch.json");
        fs::write(&latest_path, serde_json::to_string(&epoch)?)
            .with_context(|| "Failed to write latest_epoch.json")?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Restore the weights of the latest saved epoch into `model`.
    pub fn load_model<B: Backend, M: Module<B>>(&self, model: M, device: &B::Device) -> Result<M> {
        let epoch = self.latest_epoch()?;
        tracing::info!("Loading checkpoint from epoch {}", epoch);
        load_record_file(model, &self.dir.join(format!("model_epoch_{epoch}")), device)
    }

    pub fn save_config(&self, cfg: &RunConfig) -> Result<()> {
        let path = self.dir.join(RUN_CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| {
                format!("Cannot write config to '{}'", path.display())
            })?;

        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }

    /// The config saved by `train`, if this directory has one.
    pub fn load_config(&self) -> Result<Option<RunConfig>> {
        let path = self.dir.join(RUN_CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path)
            .with_context(|| {
                format!("Cannot read config from '{}'", path.display())
            })?;

        let cfg = serde_json::from_str(&json)
            .with_context(|| format!("Malformed run config '{}'", path.display()))?;
        Ok(Some(cfg))
    }

    pub fn latest_epoch(&self) -> Result<usize> {
        let path = self.dir.join("latest_epoch.json");

        let s = fs::read_to_string(&path)
            .with_context(|| {
                format!("Cannot find '{}'. Have you run 'train' first?", path.display())
            })?;

        Ok(serde_json::from_str::<usize>(&s)?)
    }
}

/// Restore `model` from a checkpoint. `target` is either a checkpoint
/// directory (its latest epoch is used) or a single record file, with
/// or without the `.mpk.gz` extension.
pub fn load_checkpoint<B: Backend, M: Module<B>>(model: M, target: &str, device: &B::Device) -> Result<M> {
    if Path::new(target).is_dir() {
        return CheckpointManager::new(target)?.load_model(model, device);
    }
    let file = target.strip_suffix(RECORD_EXTENSION).unwrap_or(target);
    load_record_file(model, Path::new(file), device)
}

fn load_record_file<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    let record = CompactRecorder::new()
        .load(path.to_path_buf(), device)
        .with_context(|| {
            format!("Cannot load checkpoint '{}'. Have you trained the model first?",
                path.display())
        })?;
    Ok(model.load_record(record))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{bart::tests::tiny_config, bart_gen::BartGen, seq2seq::ArgumentGenerator};
    use burn::backend::NdArray;

    type TB = NdArray;

    fn weights(model: &BartGen<TB>) -> Vec<f32> {
        model.model.shared.weight.val().into_data().iter::<f32>().collect()
    }

    // CompactRecorder stores half precision
    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-3, "{x} vs {y}");
        }
    }

    #[test]
    fn saved_weights_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let manager = CheckpointManager::new(dir.path().to_string_lossy()).unwrap();

        let trained = BartGen::<TB>::init(&tiny_config(12), &device);
        manager.save_model(&trained, 2).unwrap();
        assert_eq!(manager.latest_epoch().unwrap(), 2);

        let fresh = BartGen::<TB>::init(&tiny_config(12), &device);
        assert_ne!(weights(&fresh), weights(&trained));

        let restored = manager.load_model(fresh, &device).unwrap();
        assert_close(&weights(&restored), &weights(&trained));

        let file = dir.path().join("model_epoch_2.mpk.gz");
        let fresh = BartGen::<TB>::init(&tiny_config(12), &device);
        let restored = load_checkpoint(fresh, &file.to_string_lossy(), &device).unwrap();
        assert_close(&weights(&restored), &weights(&trained));
    }

    #[test]
    fn run_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().to_string_lossy()).unwrap();
        let cfg = RunConfig { max_steps: 50, ..Default::default() };
        assert_eq!(manager.load_config().unwrap(), None);
        manager.save_config(&cfg).unwrap();
        assert_eq!(manager.load_config().unwrap(), Some(cfg));
    }

    #[test]
    fn loading_before_training_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().to_string_lossy()).unwrap();
        let model = BartGen::<TB>::init(&tiny_config(12), &Default::default());
        assert!(manager.load_model(model, &Default::default()).is_err());
    }
}
