// ============================================================
// Layer 4 — Argument Batcher
// ============================================================
// Implements Burn's Batcher trait to stack ArgumentSamples
// into tensors of shape [batch_size, seq_len].
//
// Samples may have different lengths, so every sequence is
// right-padded to the longest one in the batch:
//   token ids      → pad_token_id
//   attention mask → 0
//
// Input and target sequences are padded independently, so
// input_token_ids and tgt_token_ids may have different widths,
// but every tensor shares the same leading (batch) dimension.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::ArgumentSample;

// ─── ArgumentBatch ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ArgumentBatch<B: Backend> {
    /// One document id per row
    pub doc_keys:        Vec<String>,
    /// [batch_size, input_len]
    pub input_token_ids: Tensor<B, 2, Int>,
    /// [batch_size, input_len]
    pub input_attn_mask: Tensor<B, 2, Int>,
    /// [batch_size, target_len]
    pub tgt_token_ids:   Tensor<B, 2, Int>,
    /// [batch_size, target_len]
    pub tgt_attn_mask:   Tensor<B, 2, Int>,
}

// ─── ArgumentBatcher ──────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct ArgumentBatcher<B: Backend> {
    pub device:       B::Device,
    pub pad_token_id: u32,
}

impl<B: Backend> ArgumentBatcher<B> {
    pub fn new(device: B::Device, pad_token_id: u32) -> Self {
        Self { device, pad_token_id }
    }

    /// Pad `rows` to a common width and upload them as a [rows, width] tensor.
    fn stack(&self, rows: Vec<&[u32]>, pad: u32) -> Tensor<B, 2, Int> {
        let batch_size = rows.len();
        let width      = rows.iter().map(|r| r.len()).max().unwrap_or(0);

        let mut flat: Vec<i64> = Vec::with_capacity(batch_size * width);
        for row in rows {
            flat.extend(row.iter().map(|&x| x as i64));
            flat.extend(std::iter::repeat(pad as i64).take(width - row.len()));
        }

        Tensor::from_data(TensorData::new(flat, [batch_size, width]), &self.device)
    }
}

impl<B: Backend> Batcher<ArgumentSample, ArgumentBatch<B>> for ArgumentBatcher<B> {
    fn batch(&self, items: Vec<ArgumentSample>) -> ArgumentBatch<B> {
        let pad = self.pad_token_id;

        let input_token_ids = self.stack(items.iter().map(|s| s.input_token_ids.as_slice()).collect(), pad);
        let input_attn_mask = self.stack(items.iter().map(|s| s.input_attn_mask.as_slice()).collect(), 0);
        let tgt_token_ids   = self.stack(items.iter().map(|s| s.tgt_token_ids.as_slice()).collect(), pad);
        let tgt_attn_mask   = self.stack(items.iter().map(|s| s.tgt_attn_mask.as_slice()).collect(), 0);

        ArgumentBatch {
            doc_keys: items.into_iter().map(|s| s.doc_key).collect(),
            input_token_ids,
            input_attn_mask,
            tgt_token_ids,
            tgt_attn_mask,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn sample(key: &str, input: &[u32], tgt: &[u32]) -> ArgumentSample {
        ArgumentSample {
            doc_key:         key.to_string(),
            input_token_ids: input.to_vec(),
            input_attn_mask: vec![1; input.len()],
            tgt_token_ids:   tgt.to_vec(),
            tgt_attn_mask:   vec![1; tgt.len()],
        }
    }

    #[test]
    fn pads_ragged_samples_to_common_width() {
        let batcher = ArgumentBatcher::<NdArray>::new(Default::default(), 1);
        let batch = batcher.batch(vec![
            sample("d1", &[0, 7, 8, 2], &[0, 9, 2]),
            sample("d2", &[0, 7, 2], &[0, 2]),
        ]);

        assert_eq!(batch.doc_keys, vec!["d1", "d2"]);
        assert_eq!(batch.input_token_ids.dims(), [2, 4]);
        assert_eq!(batch.input_attn_mask.dims(), [2, 4]);
        assert_eq!(batch.tgt_token_ids.dims(), [2, 3]);
        assert_eq!(batch.tgt_attn_mask.dims(), [2, 3]);

        let ids: Vec<i64> = batch.input_token_ids.into_data().iter::<i64>().collect();
        assert_eq!(ids, vec![0, 7, 8, 2, 0, 7, 2, 1]);
        let mask: Vec<i64> = batch.tgt_attn_mask.into_data().iter::<i64>().collect();
        assert_eq!(mask, vec![1, 1, 1, 1, 1, 0]);
    }
}
