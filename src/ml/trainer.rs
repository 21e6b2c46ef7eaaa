// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Drives a GenieModel through its lifecycle using Burn's
// DataLoader:
//
//   configure_optimizers            once
//   per epoch
//     training_step                 every batch, loss / accumulate
//     optimizer + scheduler step    every accumulate batches, and
//                                   once more for an epoch's leftover
//     global-norm gradient clipping before each optimizer step
//     validation_step               every validation batch
//     validation_epoch_end          once
//     metrics row + checkpoint
//
// Training uses the autodiff backend; model.valid() moves the
// orchestrator to the inner backend for validation, so the
// validation batcher is built on B::InnerBackend too.
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::Result;
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::{batcher::ArgumentBatcher, dataset::ArgumentDataset};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    genie::{GenieModel, OptimizerSetup},
    optim::{GradientAccumulation, GroupedOptimizer},
    seq2seq::ArgumentGenerator,
};

/// Where a run ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSummary {
    pub epochs:        usize,
    pub global_step:   usize,
    pub best_val_loss: f64,
}

pub fn run_training<B, M>(
    mut genie:     GenieModel<B, M>,
    train_dataset: ArgumentDataset,
    val_dataset:   ArgumentDataset,
    ckpt_manager:  &CheckpointManager,
    metrics:       &MetricsLogger,
    device:        &B::Device,
) -> Result<(GenieModel<B, M>, TrainingSummary)>
where
    B: AutodiffBackend,
    M: ArgumentGenerator<B> + AutodiffModule<B>,
    M::InnerModule: ArgumentGenerator<B::InnerBackend>,
{
    let cfg = genie.hparams().clone();
    B::seed(cfg.seed);

    let train_len = train_dataset.num_batches(cfg.train_batch_size);
    let OptimizerSetup { plan, mut optimizer, scheduler } = genie.configure_optimizers(train_len)?;
    let mut schedule = scheduler.schedule;
    tracing::info!(
        "{} batches per epoch, {} optimizer steps over {} epochs ({} stepped per {:?})",
        train_len, plan.total_steps, plan.num_train_epochs, scheduler.name, scheduler.interval,
    );
    tracing::debug!(
        "Parameter groups: {} with weight decay, {} without",
        optimizer.groups().decay.params.len(),
        optimizer.groups().no_decay.params.len(),
    );

    // ── Training data loader (AutodiffBackend) ────────────────────────────────
    let pad = genie.pad_token_id();
    let train_loader = DataLoaderBuilder::new(ArgumentBatcher::<B>::new(device.clone(), pad))
        .batch_size(cfg.train_batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(train_dataset);

    // ── Validation data loader (InnerBackend, no autodiff overhead) ──────────
    let val_loader = DataLoaderBuilder::new(ArgumentBatcher::<B::InnerBackend>::new(device.clone(), pad))
        .batch_size(cfg.eval_batch_size)
        .num_workers(1)
        .build(val_dataset);

    let accumulate   = cfg.accumulate_grad_batches;
    let clip         = cfg.gradient_clip_val;
    let step_limited = cfg.max_steps > 0;
    let mut accumulation = GradientAccumulation::<M>::new();
    let mut global_step  = 0usize;
    let mut last_lr      = 0.0f64;
    let mut best_val     = f64::INFINITY;
    let mut epochs_run   = 0usize;

    for epoch in 1..=plan.num_train_epochs {
        // ── Training phase ────────────────────────────────────────────────────
        let mut train_loss_sum = 0.0f64;
        let mut train_batches  = 0usize;

        for batch in train_loader.iter() {
            let step = genie.training_step(&batch)?;
            train_loss_sum += step.loss.clone().into_scalar().elem::<f64>();
            train_batches  += 1;

            let loss  = step.loss.div_scalar(accumulate as f64);
            let grads = optimizer.split::<B, M>(loss.backward(), genie.model());
            accumulation.accumulate::<B>(genie.model(), grads);

            if accumulation.pending() == accumulate {
                last_lr = schedule.step();
                genie = apply_update(genie, &mut optimizer, &mut accumulation, last_lr, clip);
                global_step += 1;

                if step_limited && global_step >= plan.total_steps {
                    break;
                }
            }
        }

        // Batches left over when train_len is not a multiple of accumulate
        if accumulation.pending() > 0 {
            last_lr = schedule.step();
            genie = apply_update(genie, &mut optimizer, &mut accumulation, last_lr, clip);
            global_step += 1;
        }

        let avg_train_loss = if train_batches > 0 {
            train_loss_sum / train_batches as f64
        } else { f64::NAN };

        // ── Validation phase ──────────────────────────────────────────────────
        let genie_valid = genie.valid();
        let mut outputs = Vec::new();
        for batch in val_loader.iter() {
            outputs.push(genie_valid.validation_step(&batch)?);
        }

        let avg_val_loss = if outputs.is_empty() {
            tracing::warn!("Validation set is empty, skipping val/loss");
            f64::NAN
        } else {
            genie_valid.validation_epoch_end(outputs)?.loss.into_scalar().elem::<f64>()
        };

        println!(
            "Epoch {:>3}/{} | step {:>6} | train/loss={:.4} | val/loss={:.4} | lr={:.2e}",
            epoch, plan.num_train_epochs, global_step, avg_train_loss, avg_val_loss, last_lr,
        );

        let row = EpochMetrics::new(epoch, global_step, avg_train_loss, avg_val_loss, last_lr);
        if row.is_improvement(best_val) {
            tracing::info!("New best val/loss {:.4} at epoch {}", avg_val_loss, epoch);
            best_val = avg_val_loss;
        }
        metrics.log(&row)?;

        ckpt_manager.save_model::<B, M>(genie.model(), epoch)?;
        tracing::info!("Checkpoint saved for epoch {}", epoch);
        epochs_run = epoch;

        if step_limited && global_step >= plan.total_steps {
            tracing::info!("Reached max_steps = {}", plan.total_steps);
            break;
        }
    }

    tracing::info!(
        "Training complete after {} scheduler steps, metrics in '{}'",
        schedule.current_step(),
        metrics.csv_path().display(),
    );
    let summary = TrainingSummary { epochs: epochs_run, global_step, best_val_loss: best_val };
    Ok((genie, summary))
}

/// One optimizer step from the accumulated micro-batches.
fn apply_update<B, M, O>(
    genie:        GenieModel<B, M>,
    optimizer:    &mut GroupedOptimizer<O>,
    accumulation: &mut GradientAccumulation<M>,
    lr:           f64,
    clip:         f64,
) -> GenieModel<B, M>
where
    B: AutodiffBackend,
    M: ArgumentGenerator<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let mut grads = accumulation.take();
    if clip > 0.0 {
        let norm = grads.clip_global_norm::<B, M>(genie.model(), clip);
        tracing::trace!("Gradient norm {:.4} (clip at {})", norm, clip);
    }
    genie.map_model(|model| optimizer.step::<B, M>(lr, model, grads))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::RunConfig;
    use crate::ml::{bart_gen::BartGen, genie::tests::{genie, sample}};
    use burn::backend::{Autodiff, NdArray};

    type AB = Autodiff<NdArray>;

    fn dataset(n: usize) -> ArgumentDataset {
        ArgumentDataset::new((0..n).map(|i| sample(&format!("doc{i}"))).collect())
    }

    #[test]
    fn max_steps_stops_training_early() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt_dir = dir.path().to_string_lossy().into_owned();
        let hparams = RunConfig {
            ckpt_dir: ckpt_dir.clone(),
            train_batch_size: 2,
            eval_batch_size: 2,
            max_steps: 3,
            learning_rate: 1e-3,
            ..Default::default()
        };
        let manager = CheckpointManager::new(&ckpt_dir).unwrap();
        let metrics = MetricsLogger::new(&ckpt_dir).unwrap();

        // 4 batches per epoch → 3 / 4 / 1 + 1 = 1 epoch, stopped after 3 steps
        let (_, summary) = run_training(
            genie::<AB, BartGen<AB>>(hparams),
            dataset(8),
            dataset(2),
            &manager,
            &metrics,
            &Default::default(),
        ).unwrap();

        assert_eq!(summary.global_step, 3);
        assert_eq!(summary.epochs, 1);
        assert!(summary.best_val_loss.is_finite());
        assert_eq!(manager.latest_epoch().unwrap(), 1);

        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn accumulation_divides_optimizer_steps() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt_dir = dir.path().to_string_lossy().into_owned();
        let hparams = RunConfig {
            ckpt_dir: ckpt_dir.clone(),
            train_batch_size: 1,
            eval_batch_size: 1,
            num_train_epochs: 2,
            accumulate_grad_batches: 2,
            ..Default::default()
        };
        let manager = CheckpointManager::new(&ckpt_dir).unwrap();
        let metrics = MetricsLogger::new(&ckpt_dir).unwrap();

        let (_, summary) = run_training(
            genie::<AB, BartGen<AB>>(hparams),
            dataset(4),
            dataset(1),
            &manager,
            &metrics,
            &Default::default(),
        ).unwrap();

        assert_eq!(summary.epochs, 2);
        assert_eq!(summary.global_step, 4);
        assert_eq!(manager.latest_epoch().unwrap(), 2);
    }

    #[test]
    fn leftover_batches_still_step_the_optimizer() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt_dir = dir.path().to_string_lossy().into_owned();
        let hparams = RunConfig {
            ckpt_dir: ckpt_dir.clone(),
            train_batch_size: 1,
            eval_batch_size: 1,
            num_train_epochs: 1,
            accumulate_grad_batches: 2,
            ..Default::default()
        };
        let manager = CheckpointManager::new(&ckpt_dir).unwrap();
        let metrics = MetricsLogger::new(&ckpt_dir).unwrap();

        // 3 batches with accumulate 2: one full step, one for the third batch
        let (_, summary) = run_training(
            genie::<AB, BartGen<AB>>(hparams),
            dataset(3),
            dataset(1),
            &manager,
            &metrics,
            &Default::default(),
        ).unwrap();

        assert_eq!(summary.epochs, 1);
        assert_eq!(summary.global_step, 2);
    }
}
