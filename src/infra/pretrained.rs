// ============================================================
// Layer 6 — Pretrained Weights
// ============================================================
// Reads the HuggingFace BART checkpoint directory:
//
//   <pretrained_dir>/
//     config.json          → BartConfig (required)
//     pytorch_model.bin    → encoder-decoder weights (optional)
//
// Weight keys are remapped onto the Burn module layout:
//   model.encoder.…              → encoder.…
//   *layer_norm.weight / .bias   → *layer_norm.gamma / .beta
//
// Reference: Burn Book §6 (Importing PyTorch models)

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use crate::ml::bart::{BartConfig, BartRecord};

pub struct PretrainedDir {
    dir: PathBuf,
}

impl PretrainedDir {
    pub fn new(dir: impl Into<String>) -> Self {
        Self { dir: PathBuf::from(dir.into()) }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn load_config(&self) -> Result<BartConfig> {
        let path = self.dir.join("config.json");
        BartConfig::load(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read BART config '{}': {}", path.display(), e))
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join("pytorch_model.bin")
    }

    /// Encoder-decoder weights, or None when no pytorch_model.bin is present.
    pub fn load_backbone<B: Backend>(&self, device: &B::Device) -> Result<Option<BartRecord<B>>> {
        let path = self.weights_path();
        if !path.exists() {
            return Ok(None);
        }

        tracing::info!("Importing pretrained weights from '{}'", path.display());
        let args = LoadArgs::new(path.clone())
            .with_key_remap(r"^model\.(.*)$", "$1")
            .with_key_remap(r"^(.*(?:layer_norm|layernorm_embedding))\.weight$", "$1.gamma")
            .with_key_remap(r"^(.*(?:layer_norm|layernorm_embedding))\.bias$", "$1.beta");

        let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(args, device)
            .with_context(|| format!("Cannot import weights from '{}'", path.display()))?;
        Ok(Some(record))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn config_ignores_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut json = serde_json::to_value(BartConfig::new().with_vocab_size(100).with_d_model(16)).unwrap();
        json["architectures"] = serde_json::json!(["BartModel"]);
        json["classif_dropout"] = serde_json::json!(0.1);
        std::fs::write(dir.path().join("config.json"), json.to_string()).unwrap();

        let cfg = PretrainedDir::new(dir.path().to_string_lossy()).load_config().unwrap();
        assert_eq!(cfg.vocab_size, 100);
        assert_eq!(cfg.d_model, 16);
        assert_eq!(cfg.decoder_layers, 12);
        assert_eq!(cfg.pad_token_id, 1);
    }

    #[test]
    fn missing_weights_are_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pretrained = PretrainedDir::new(dir.path().to_string_lossy());
        let record = pretrained.load_backbone::<NdArray>(&Default::default()).unwrap();
        assert!(record.is_none());
    }

    #[test]
    fn missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PretrainedDir::new(dir.path().to_string_lossy()).load_config().is_err());
    }
}
