// ============================================================
// Layer 2 — TestUseCase
// ============================================================
// Decodes the test set with a trained checkpoint:
//
//   Step 1: Load test JSON lines               (Layer 4 - data)
//   Step 2: Check the run_config.json saved by train (Layer 6 - infra)
//             model and pretrained_dir must agree with this run
//   Step 3: Build the configured variant       (Layer 5 - ml)
//   Step 4: Restore checkpoint weights         (Layer 6 - infra)
//             load_ckpt if given, else the latest epoch in ckpt_dir
//   Step 5: test_step per batch, test_epoch_end (Layer 5 - ml)

use anyhow::{bail, Result};
use burn::prelude::*;
use std::path::Path;

use crate::application::train_use_case::MyInnerBackend;
use crate::data::dataset::ArgumentDataset;
use crate::domain::config::{ModelVariant, RunConfig};
use crate::infra::checkpoint::{load_checkpoint, CheckpointManager};
use crate::ml::{
    bart_gen::BartGen,
    evaluator::run_evaluation,
    genie::GenieModel,
    pointer_gen::BartPointerGen,
    seq2seq::ArgumentGenerator,
};

pub struct TestUseCase {
    config: RunConfig,
}

impl TestUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Returns the number of predictions written.
    pub fn execute(&self) -> Result<usize> {
        let cfg = &self.config;
        cfg.validate()?;

        let source = cfg.load_ckpt.clone().unwrap_or_else(|| cfg.ckpt_dir.clone());
        check_training_run(cfg, &source)?;

        let test_dataset = ArgumentDataset::from_jsonl(&cfg.test_file)?;
        let device = burn::backend::wgpu::WgpuDevice::default();

        match cfg.model {
            ModelVariant::Gen => test_variant::<MyInnerBackend, BartGen<MyInnerBackend>>(
                cfg, &source, test_dataset, &device,
            ),
            ModelVariant::Pointer => test_variant::<MyInnerBackend, BartPointerGen<MyInnerBackend>>(
                cfg, &source, test_dataset, &device,
            ),
        }
    }
}

/// Compare against the config the checkpoint was trained with. A
/// checkpoint without run_config.json is accepted as is.
fn check_training_run(cfg: &RunConfig, source: &str) -> Result<()> {
    let path = Path::new(source);
    let dir  = if path.is_dir() { path } else { path.parent().unwrap_or(Path::new("")) };
    if !dir.as_os_str().is_empty() && !dir.is_dir() {
        return Ok(());
    }

    let Some(trained) = CheckpointManager::new(dir.to_string_lossy())?.load_config()? else {
        tracing::warn!("No run config next to '{}', cannot check the model variant", source);
        return Ok(());
    };
    if trained.model != cfg.model {
        bail!(
            "checkpoint '{}' was trained with --model {}, but this run uses --model {}",
            source, trained.model, cfg.model,
        );
    }
    if trained.pretrained_dir != cfg.pretrained_dir {
        bail!(
            "checkpoint '{}' was trained from '{}', but this run uses --pretrained-dir '{}'",
            source, trained.pretrained_dir, cfg.pretrained_dir,
        );
    }
    Ok(())
}

fn test_variant<B: Backend, M: ArgumentGenerator<B>>(
    cfg:          &RunConfig,
    source:       &str,
    test_dataset: ArgumentDataset,
    device:       &B::Device,
) -> Result<usize> {
    tracing::info!("Restoring weights from '{}'", source);

    let mut genie = GenieModel::<B, M>::new(cfg.clone(), device)?
        .try_map_model(|model| load_checkpoint(model, source, device))?;

    run_evaluation(&mut genie, test_dataset, device)
}
