// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Validate and save the run config   (Layer 6 - infra)
//   Step 2: Load train / val JSON lines        (Layer 4 - data)
//   Step 3: Build the configured variant       (Layer 5 - ml)
//   Step 4: Run training loop                  (Layer 5 - ml)
//
// The variant is picked once here; everything below runs
// against the concrete model type.

use anyhow::Result;
use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};

use crate::data::dataset::ArgumentDataset;
use crate::domain::config::{ModelVariant, RunConfig};
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::{
    bart_gen::BartGen,
    genie::GenieModel,
    pointer_gen::BartPointerGen,
    seq2seq::ArgumentGenerator,
    trainer::{run_training, TrainingSummary},
};

pub type MyBackend      = burn::backend::Autodiff<burn::backend::Wgpu>;
pub type MyInnerBackend = burn::backend::Wgpu;

pub struct TrainUseCase {
    config: RunConfig,
}

impl TrainUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainingSummary> {
        let cfg = &self.config;
        cfg.validate()?;

        // ── Step 1: Save config next to the checkpoints ───────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.ckpt_dir)?;
        ckpt_manager.save_config(cfg)?;
        let metrics = MetricsLogger::new(&cfg.ckpt_dir)?;

        // ── Step 2: Load datasets ─────────────────────────────────────────────
        let train_dataset = ArgumentDataset::from_jsonl(&cfg.train_file)?;
        let val_dataset   = ArgumentDataset::from_jsonl(&cfg.val_file)?;

        // ── Step 3 + 4: Build the variant and train it ────────────────────────
        let device = burn::backend::wgpu::WgpuDevice::default();
        tracing::info!("Using WGPU device: {:?}", device);

        match cfg.model {
            ModelVariant::Gen => train_variant::<MyBackend, BartGen<MyBackend>>(
                cfg, train_dataset, val_dataset, &ckpt_manager, &metrics, &device,
            ),
            ModelVariant::Pointer => train_variant::<MyBackend, BartPointerGen<MyBackend>>(
                cfg, train_dataset, val_dataset, &ckpt_manager, &metrics, &device,
            ),
        }
    }
}

fn train_variant<B, M>(
    cfg:           &RunConfig,
    train_dataset: ArgumentDataset,
    val_dataset:   ArgumentDataset,
    ckpt_manager:  &CheckpointManager,
    metrics:       &MetricsLogger,
    device:        &B::Device,
) -> Result<TrainingSummary>
where
    B: AutodiffBackend,
    M: ArgumentGenerator<B> + AutodiffModule<B>,
    M::InnerModule: ArgumentGenerator<B::InnerBackend>,
{
    let genie = GenieModel::<B, M>::new(cfg.clone(), device)?;
    let (_, summary) = run_training(genie, train_dataset, val_dataset, ckpt_manager, metrics, device)?;
    Ok(summary)
}
