// ============================================================
// Layer 5 — Optimisation
// ============================================================
//   TrainingPlan       — total optimizer steps and epoch count
//   ParamGroups        — weight decay vs. no weight decay
//   GroupedOptimizer   — one AdamW per group, stepped together
//   GroupGradients     — one backward pass split by group,
//                        clipped over the global L2 norm
//   GradientAccumulation — sums micro-batch gradients per group
//   LinearWarmupDecay  — lr ramps 0 → base over warmup_steps,
//                        then decays linearly to 0 at total_steps
//
// Reference: Loshchilov & Hutter (2019) AdamW
//            Burn Book §5 (Optimizers)

use anyhow::{bail, Result};
use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::marker::PhantomData;

/// Substrings marking parameters excluded from weight decay.
pub const NO_DECAY: [&str; 2] = ["bias", "LayerNorm.weight"];

// ─── TrainingPlan ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingPlan {
    /// Optimizer steps the schedule spans
    pub total_steps:      usize,
    /// Epochs the trainer runs; derived from max_steps when it is set
    pub num_train_epochs: usize,
}

impl TrainingPlan {
    /// `train_len` is the number of training batches per epoch.
    pub fn new(
        max_steps:               i64,
        train_len:               usize,
        accumulate_grad_batches: usize,
        num_train_epochs:        usize,
    ) -> Result<Self> {
        if train_len == 0 {
            bail!("training set yields no batches");
        }
        if accumulate_grad_batches == 0 {
            bail!("accumulate_grad_batches must be at least 1");
        }

        if max_steps > 0 {
            let max_steps = max_steps as usize;
            Ok(Self {
                total_steps:      max_steps,
                num_train_epochs: max_steps / train_len / accumulate_grad_batches + 1,
            })
        } else {
            Ok(Self {
                total_steps: train_len / accumulate_grad_batches * num_train_epochs,
                num_train_epochs,
            })
        }
    }
}

// ─── Parameter groups ─────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ParamGroup {
    pub params:       Vec<ParamId>,
    pub weight_decay: f64,
}

#[derive(Debug, Clone)]
pub struct ParamGroups {
    pub decay:    ParamGroup,
    pub no_decay: ParamGroup,
}

impl ParamGroups {
    /// Split named parameters: names containing any of NO_DECAY get
    /// weight decay 0.0, everything else gets `weight_decay`.
    pub fn partition(named: Vec<(String, ParamId)>, weight_decay: f64) -> Self {
        let (no_decay, decay): (Vec<_>, Vec<_>) = named
            .into_iter()
            .partition(|(name, _)| NO_DECAY.iter().any(|nd| name.contains(nd)));

        Self {
            decay: ParamGroup {
                params: decay.into_iter().map(|(_, id)| id).collect(),
                weight_decay,
            },
            no_decay: ParamGroup {
                params: no_decay.into_iter().map(|(_, id)| id).collect(),
                weight_decay: 0.0,
            },
        }
    }
}

// ─── GroupedOptimizer ─────────────────────────────────────────────────────────
/// Gradients of one backward pass, split by parameter group.
pub struct GroupGradients {
    pub decay:    GradientsParams,
    pub no_decay: GradientsParams,
}

impl GroupGradients {
    /// Scale every gradient of both groups by `min(1, max_norm / norm)`,
    /// where `norm` is the L2 norm over all of them taken together.
    /// Returns the norm before clipping.
    pub fn clip_global_norm<B, M>(&mut self, model: &M, max_norm: f64) -> f64
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut squares = SquaredNorm::<B> { grads: self, sum: 0.0, _backend: PhantomData };
        model.visit(&mut squares);
        let norm = squares.sum.sqrt();

        let scale = max_norm / (norm + 1e-6);
        if scale < 1.0 {
            model.visit(&mut Rescale::<B> { grads: self, scale, _backend: PhantomData });
        }
        norm
    }
}

// Visitors give each parameter's rank, which GradientsParams lookups need.
struct SquaredNorm<'a, B> {
    grads:    &'a GroupGradients,
    sum:      f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        for grads in [&self.grads.decay, &self.grads.no_decay] {
            if let Some(grad) = grads.get::<B::InnerBackend, D>(id.clone()) {
                self.sum += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
            }
        }
    }
}

struct Rescale<'a, B> {
    grads:    &'a mut GroupGradients,
    scale:    f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let scale = self.scale;
        for grads in [&mut self.grads.decay, &mut self.grads.no_decay] {
            if let Some(grad) = grads.remove::<B::InnerBackend, D>(id.clone()) {
                grads.register::<B::InnerBackend, D>(id.clone(), grad.mul_scalar(scale));
            }
        }
    }
}

pub struct GroupedOptimizer<O> {
    decay:    O,
    no_decay: O,
    groups:   ParamGroups,
}

impl<O> GroupedOptimizer<O> {
    pub fn new(decay: O, no_decay: O, groups: ParamGroups) -> Self {
        Self { decay, no_decay, groups }
    }

    pub fn groups(&self) -> &ParamGroups {
        &self.groups
    }

    /// Pull each group's gradients out of a backward pass.
    pub fn split<B, M>(&self, mut grads: B::Gradients, model: &M) -> GroupGradients
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        GroupGradients {
            decay:    GradientsParams::from_params(&mut grads, model, &self.groups.decay.params),
            no_decay: GradientsParams::from_params(&mut grads, model, &self.groups.no_decay.params),
        }
    }

    pub fn step<B, M>(&mut self, lr: f64, model: M, grads: GroupGradients) -> M
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let model = self.decay.step(lr, model, grads.decay);
        self.no_decay.step(lr, model, grads.no_decay)
    }
}

// ─── GradientAccumulation ─────────────────────────────────────────────────────
pub struct GradientAccumulation<M> {
    decay:    GradientsAccumulator<M>,
    no_decay: GradientsAccumulator<M>,
    pending:  usize,
}

impl<M> GradientAccumulation<M> {
    pub fn new() -> Self {
        Self {
            decay:    GradientsAccumulator::new(),
            no_decay: GradientsAccumulator::new(),
            pending:  0,
        }
    }

    pub fn accumulate<B>(&mut self, model: &M, grads: GroupGradients)
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        self.decay.accumulate(model, grads.decay);
        self.no_decay.accumulate(model, grads.no_decay);
        self.pending += 1;
    }

    /// Micro-batches accumulated since the last `take`.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn take(&mut self) -> GroupGradients {
        self.pending = 0;
        GroupGradients {
            decay:    self.decay.grads(),
            no_decay: self.no_decay.grads(),
        }
    }
}

impl<M> Default for GradientAccumulation<M> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── LinearWarmupDecay ────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct LinearWarmupDecay {
    base_lr:      f64,
    warmup_steps: usize,
    total_steps:  usize,
    current:      usize,
}

impl LinearWarmupDecay {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self { base_lr, warmup_steps, total_steps, current: 0 }
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let span      = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        self.base_lr * (remaining / span).max(0.0)
    }

    /// Learning rate for the next optimizer step; advances the schedule.
    pub fn step(&mut self) -> f64 {
        let lr = self.lr_at(self.current);
        self.current += 1;
        lr
    }

    pub fn current_step(&self) -> usize {
        self.current
    }
}

/// When the scheduler is stepped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepInterval {
    /// Once per optimizer step
    Step,
}

#[derive(Debug, Clone)]
pub struct SchedulerDescriptor {
    pub schedule: LinearWarmupDecay,
    pub interval: StepInterval,
    pub name:     &'static str,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        nn::{Linear, LinearConfig},
    };

    type AB = Autodiff<NdArray>;

    #[test]
    fn max_steps_derives_epoch_count() {
        let plan = TrainingPlan::new(100, 20, 2, 7).unwrap();
        assert_eq!(plan.total_steps, 100);
        assert_eq!(plan.num_train_epochs, 3);
    }

    #[test]
    fn epochs_derive_total_steps() {
        let plan = TrainingPlan::new(-1, 21, 2, 3).unwrap();
        assert_eq!(plan.total_steps, 30); // 21 / 2 = 10 per epoch
        assert_eq!(plan.num_train_epochs, 3);

        let plan = TrainingPlan::new(0, 20, 1, 2).unwrap();
        assert_eq!(plan.total_steps, 40);
    }

    #[test]
    fn empty_training_set_is_rejected() {
        assert!(TrainingPlan::new(10, 0, 1, 1).is_err());
    }

    #[test]
    fn bias_and_layernorm_weights_skip_decay() {
        let names = [
            "model.encoder.layers.0.fc1.weight",
            "model.encoder.layers.0.fc1.bias",
            "bert.encoder.LayerNorm.weight",
            "model.encoder.layers.0.final_layer_norm.weight",
            "final_logits_bias",
        ];
        let ids: Vec<ParamId> = names.iter().map(|_| ParamId::new()).collect();
        let named = names.iter().map(|n| n.to_string()).zip(ids.iter().cloned()).collect();

        let groups = ParamGroups::partition(named, 0.01);

        assert_eq!(groups.no_decay.weight_decay, 0.0);
        assert_eq!(groups.decay.weight_decay, 0.01);
        assert_eq!(groups.no_decay.params, vec![ids[1].clone(), ids[2].clone(), ids[4].clone()]);
        assert_eq!(groups.decay.params, vec![ids[0].clone(), ids[3].clone()]);
    }

    #[test]
    fn schedule_warms_up_then_decays_to_zero() {
        let mut sched = LinearWarmupDecay::new(1.0, 10, 110);
        assert_eq!(sched.step(), 0.0);
        assert!((sched.lr_at(5) - 0.5).abs() < 1e-12);
        assert!((sched.lr_at(10) - 1.0).abs() < 1e-12);
        assert!((sched.lr_at(60) - 0.5).abs() < 1e-12);
        assert_eq!(sched.lr_at(110), 0.0);
        assert_eq!(sched.lr_at(500), 0.0);
        assert_eq!(sched.current_step(), 1);
    }

    #[test]
    fn schedule_without_warmup_starts_at_base() {
        let sched = LinearWarmupDecay::new(2e-5, 0, 4);
        assert_eq!(sched.lr_at(0), 2e-5);
        assert!((sched.lr_at(2) - 1e-5).abs() < 1e-18);
    }

    /// Weight in the decay group, bias in the no-decay group.
    fn split_gradients(model: &Linear<AB>, weight: f32, bias: f32) -> GroupGradients {
        let device = Default::default();
        let bias_id = model.bias.as_ref().unwrap().id.clone();

        let mut decay = GradientsParams::new();
        decay.register::<NdArray, 2>(model.weight.id.clone(), Tensor::from_floats([[weight]], &device));
        let mut no_decay = GradientsParams::new();
        no_decay.register::<NdArray, 1>(bias_id, Tensor::from_floats([bias], &device));
        GroupGradients { decay, no_decay }
    }

    fn values(model: &Linear<AB>, grads: &GroupGradients) -> (f32, f32) {
        let bias_id = model.bias.as_ref().unwrap().id.clone();
        let w: f32 = grads.decay.get::<NdArray, 2>(model.weight.id.clone()).unwrap().into_scalar();
        let b: f32 = grads.no_decay.get::<NdArray, 1>(bias_id).unwrap().into_scalar();
        (w, b)
    }

    #[test]
    fn clipping_scales_both_groups_by_joint_norm() {
        let model = LinearConfig::new(1, 1).init::<AB>(&Default::default());
        let mut grads = split_gradients(&model, 3.0, 4.0);

        let norm = grads.clip_global_norm::<AB, _>(&model, 1.0);
        assert!((norm - 5.0).abs() < 1e-5);

        // 3-4-5: each tensor alone is above 1, together they shrink by 1/5
        let (w, b) = values(&model, &grads);
        assert!((w - 0.6).abs() < 1e-4, "{w}");
        assert!((b - 0.8).abs() < 1e-4, "{b}");
    }

    #[test]
    fn gradients_below_threshold_are_untouched() {
        let model = LinearConfig::new(1, 1).init::<AB>(&Default::default());
        let mut grads = split_gradients(&model, 3.0, 4.0);

        grads.clip_global_norm::<AB, _>(&model, 10.0);
        assert_eq!(values(&model, &grads), (3.0, 4.0));
    }
}
