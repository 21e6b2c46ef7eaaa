// ============================================================
// Layer 3 — Run Configuration
// ============================================================
// Every hyperparameter of a training or evaluation run.
// Built once by the CLI layer, saved next to the checkpoints
// as run_config.json and never mutated afterwards.

use std::{fmt, str::FromStr};

use anyhow::bail;
use serde::{Deserialize, Serialize};

// ─── ModelVariant ─────────────────────────────────────────────────────────────
/// Which encoder-decoder head wraps BART.
///
///   gen     — plain conditional generation (LM head tied to embeddings)
///   pointer — generation mixed with a copy distribution over input tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    Gen,
    Pointer,
}

impl FromStr for ModelVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gen"     => Ok(Self::Gen),
            "pointer" => Ok(Self::Pointer),
            other     => bail!("unknown model variant '{other}' (expected 'gen' or 'pointer')"),
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gen     => f.write_str("gen"),
            Self::Pointer => f.write_str("pointer"),
        }
    }
}

// ─── RunConfig ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Which head wraps BART: gen or pointer
    pub model:          ModelVariant,
    /// Directory holding tokenizer.json, config.json and
    /// optionally pytorch_model.bin of the pretrained BART
    pub pretrained_dir: String,
    /// Checkpoints, metrics.csv and predictions.jsonl go here
    pub ckpt_dir:       String,
    /// Checkpoint directory to restore before testing
    pub load_ckpt:      Option<String>,

    /// JSON-lines files of preprocessed examples
    pub train_file:     String,
    pub val_file:       String,
    pub test_file:      String,

    /// Examples per training batch
    pub train_batch_size: usize,
    /// Examples per validation / test batch
    pub eval_batch_size:  usize,

    /// Peak learning rate, reached after warmup_steps
    pub learning_rate:  f64,
    /// AdamW decay for every parameter except biases and layer norm weights
    pub weight_decay:   f64,
    pub adam_epsilon:   f64,
    /// Optimizer steps of linear warmup from 0 to learning_rate
    pub warmup_steps:   usize,
    /// Values <= 0 mean "train for num_train_epochs"
    pub max_steps:      i64,
    pub num_train_epochs:        usize,
    /// Batches whose gradients are summed into one optimizer step
    pub accumulate_grad_batches: usize,
    /// Max L2 norm over all gradients together; 0.0 disables clipping
    pub gradient_clip_val:       f64,

    /// Nucleus sampling instead of greedy decoding at test time
    pub sample_gen:     bool,
    /// Seeds shuffling, initialisation and sampling
    pub seed:           u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model:            ModelVariant::Gen,
            pretrained_dir:   "pretrained/bart-large".to_string(),
            ckpt_dir:         "checkpoints/gen".to_string(),
            load_ckpt:        None,
            train_file:       "data/train.jsonl".to_string(),
            val_file:         "data/val.jsonl".to_string(),
            test_file:        "data/test.jsonl".to_string(),
            train_batch_size: 8,
            eval_batch_size:  8,
            learning_rate:    1e-5,
            weight_decay:     0.0,
            adam_epsilon:     1e-8,
            warmup_steps:     0,
            max_steps:        -1,
            num_train_epochs: 3,
            accumulate_grad_batches: 1,
            gradient_clip_val:       1.0,
            sample_gen:       false,
            seed:             42,
        }
    }
}

impl RunConfig {
    /// Reject values the training loop cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.train_batch_size == 0 || self.eval_batch_size == 0 {
            bail!("batch sizes must be at least 1");
        }
        if self.accumulate_grad_batches == 0 {
            bail!("accumulate_grad_batches must be at least 1");
        }
        if self.max_steps <= 0 && self.num_train_epochs == 0 {
            bail!("either max_steps or num_train_epochs must be positive");
        }
        Ok(())
    }
}
