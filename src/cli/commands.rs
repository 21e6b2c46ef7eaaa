// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `test`, and all
// their configurable flags. Flags shared by both live in
// ModelArgs and are flattened into each subcommand.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::domain::config::{ModelVariant, RunConfig};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fine-tune the model on preprocessed JSON-lines examples
    Train(TrainArgs),

    /// Decode the test set and write predictions.jsonl
    Test(TestArgs),
}

/// Flags that pick the model and where its files live.
#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Model variant: gen or pointer
    #[arg(long, default_value = "gen")]
    pub model: ModelVariant,

    /// Directory with tokenizer.json, config.json and pytorch_model.bin
    #[arg(long, default_value = "pretrained/bart-large")]
    pub pretrained_dir: String,

    /// Where checkpoints, metrics.csv and predictions.jsonl are written
    #[arg(long, default_value = "checkpoints/gen")]
    pub ckpt_dir: String,

    /// Batch size for validation and test
    #[arg(long, default_value_t = 8)]
    pub eval_batch_size: usize,

    /// Seed for data shuffling, dropout and sampling
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub common: ModelArgs,

    #[arg(long, default_value = "data/train.jsonl")]
    pub train_file: String,

    #[arg(long, default_value = "data/val.jsonl")]
    pub val_file: String,

    #[arg(long, default_value_t = 8)]
    pub train_batch_size: usize,

    #[arg(long, default_value_t = 1e-5)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f64,

    #[arg(long, default_value_t = 1e-8)]
    pub adam_epsilon: f64,

    /// Linear warmup length in optimizer steps
    #[arg(long, default_value_t = 0)]
    pub warmup_steps: usize,

    /// Total optimizer steps; overrides num_train_epochs when > 0
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub max_steps: i64,

    #[arg(long, default_value_t = 3)]
    pub num_train_epochs: usize,

    /// Batches whose gradients are summed before each optimizer step
    #[arg(long, default_value_t = 1)]
    pub accumulate_grad_batches: usize,

    /// Max global gradient norm; 0 disables clipping
    #[arg(long, default_value_t = 1.0)]
    pub gradient_clip_val: f64,
}

/// Convert CLI TrainArgs into the domain RunConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for RunConfig {
    fn from(a: TrainArgs) -> Self {
        RunConfig {
            model:                   a.common.model,
            pretrained_dir:          a.common.pretrained_dir,
            ckpt_dir:                a.common.ckpt_dir,
            eval_batch_size:         a.common.eval_batch_size,
            seed:                    a.common.seed,
            train_file:              a.train_file,
            val_file:                a.val_file,
            train_batch_size:        a.train_batch_size,
            learning_rate:           a.learning_rate,
            weight_decay:            a.weight_decay,
            adam_epsilon:            a.adam_epsilon,
            warmup_steps:            a.warmup_steps,
            max_steps:               a.max_steps,
            num_train_epochs:        a.num_train_epochs,
            accumulate_grad_batches: a.accumulate_grad_batches,
            gradient_clip_val:       a.gradient_clip_val,
            ..RunConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct TestArgs {
    #[command(flatten)]
    pub common: ModelArgs,

    #[arg(long, default_value = "data/test.jsonl")]
    pub test_file: String,

    /// Checkpoint directory or model_epoch_N file to restore;
    /// defaults to the latest epoch in --ckpt-dir
    #[arg(long)]
    pub load_ckpt: Option<String>,

    /// Nucleus sampling (top_k 20, top_p 0.95) instead of greedy decoding
    #[arg(long)]
    pub sample_gen: bool,
}

impl From<TestArgs> for RunConfig {
    fn from(a: TestArgs) -> Self {
        RunConfig {
            model:           a.common.model,
            pretrained_dir:  a.common.pretrained_dir,
            ckpt_dir:        a.common.ckpt_dir,
            eval_batch_size: a.common.eval_batch_size,
            seed:            a.common.seed,
            test_file:       a.test_file,
            load_ckpt:       a.load_ckpt,
            sample_gen:      a.sample_gen,
            ..RunConfig::default()
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn train_flags_map_onto_run_config() {
        let cli = Cli::try_parse_from([
            "genie", "train", "--model", "pointer", "--max-steps", "100",
            "--accumulate-grad-batches", "2", "--ckpt-dir", "ckpt/p",
        ]).unwrap();

        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg = RunConfig::from(args);
        assert_eq!(cfg.model, ModelVariant::Pointer);
        assert_eq!(cfg.max_steps, 100);
        assert_eq!(cfg.accumulate_grad_batches, 2);
        assert_eq!(cfg.ckpt_dir, "ckpt/p");
        assert!(!cfg.sample_gen);
    }

    #[test]
    fn test_flags_map_onto_run_config() {
        let cli = Cli::try_parse_from(["genie", "test", "--sample-gen", "--load-ckpt", "ckpt/gen"]).unwrap();
        let Commands::Test(args) = cli.command else { panic!("expected test") };
        let cfg = RunConfig::from(args);
        assert!(cfg.sample_gen);
        assert_eq!(cfg.load_ckpt.as_deref(), Some("ckpt/gen"));
    }

    #[test]
    fn unknown_variant_is_a_parse_error() {
        assert!(Cli::try_parse_from(["genie", "train", "--model", "seq2seq"]).is_err());
    }

    #[test]
    fn negative_max_steps_parses() {
        let cli = Cli::try_parse_from(["genie", "train", "--max-steps", "-1"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        assert_eq!(args.max_steps, -1);
    }
}
