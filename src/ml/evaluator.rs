// ============================================================
// Layer 5 — Evaluation Loop
// ============================================================
// Runs test_step over every test batch in order, then
// test_epoch_end once, which writes predictions.jsonl.

use anyhow::Result;
use burn::{data::dataloader::DataLoaderBuilder, prelude::*};

use crate::data::{batcher::ArgumentBatcher, dataset::ArgumentDataset};
use crate::ml::{genie::GenieModel, seq2seq::ArgumentGenerator};

/// Returns the number of predictions written.
pub fn run_evaluation<B, M>(
    genie:        &mut GenieModel<B, M>,
    test_dataset: ArgumentDataset,
    device:       &B::Device,
) -> Result<usize>
where
    B: Backend,
    M: ArgumentGenerator<B>,
{
    let batch_size = genie.hparams().eval_batch_size;
    let loader = DataLoaderBuilder::new(ArgumentBatcher::<B>::new(device.clone(), genie.pad_token_id()))
        .batch_size(batch_size)
        .num_workers(1)
        .build(test_dataset);

    let mut outputs = Vec::new();
    for (i, batch) in loader.iter().enumerate() {
        let records = genie.test_step(&batch)?;
        tracing::debug!("Decoded test batch {} ({} documents)", i + 1, records.len());
        outputs.push(records);
    }

    let count = outputs.iter().map(Vec::len).sum();
    genie.test_epoch_end(outputs)?;
    Ok(count)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::RunConfig;
    use crate::ml::{bart_gen::BartGen, genie::tests::{genie, sample}};
    use burn::backend::NdArray;

    type TB = NdArray;

    #[test]
    fn every_test_example_gets_a_prediction_line() {
        let dir = tempfile::tempdir().unwrap();
        let hparams = RunConfig {
            ckpt_dir: dir.path().to_string_lossy().into_owned(),
            eval_batch_size: 2,
            ..Default::default()
        };
        let mut model = genie::<TB, BartGen<TB>>(hparams);
        let dataset = ArgumentDataset::new(["x", "y", "z"].iter().map(|k| sample(k)).collect());

        let count = run_evaluation(&mut model, dataset, &Default::default()).unwrap();
        assert_eq!(count, 3);

        let text = std::fs::read_to_string(dir.path().join("predictions.jsonl")).unwrap();
        let keys: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["doc_key"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["x", "y", "z"]);
    }
}
