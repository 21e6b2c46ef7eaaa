// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and delegates to Layer 2 (application):
//
//   1. `train` — fine-tune a variant, checkpoint every epoch
//   2. `test`  — decode the test set into predictions.jsonl
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, TestArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "genie",
    version = "0.1.0",
    about = "Fine-tune BART for event argument extraction and decode predictions."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case. The CLI layer only routes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Test(args)  => run_test(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Training '{}' on {}", args.common.model, args.train_file);

    let summary = TrainUseCase::new(args.into()).execute()?;

    println!(
        "Training complete: {} epochs, {} optimizer steps, best val/loss {:.4}.",
        summary.epochs, summary.global_step, summary.best_val_loss,
    );
    Ok(())
}

fn run_test(args: TestArgs) -> Result<()> {
    use crate::application::test_use_case::TestUseCase;

    let ckpt_dir = args.common.ckpt_dir.clone();
    let count = TestUseCase::new(args.into()).execute()?;

    println!("Wrote {count} predictions to {ckpt_dir}/predictions.jsonl");
    Ok(())
}
