// ============================================================
// Layer 4 — Argument Dataset
// ============================================================
// Preprocessed examples, one JSON object per line:
//
//   {"doc_key": "...", "input_token_ids": [...], "input_attn_mask": [...],
//    "tgt_token_ids": [...], "tgt_attn_mask": [...]}
//
// Implements Burn's Dataset so the DataLoader can shuffle and
// batch it.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// One preprocessed example, as written by the data preparation step.
/// Token ids are BART ids; masks are 1 for real tokens, 0 for padding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentSample {
    /// Document identifier, copied into predictions.jsonl
    pub doc_key:         String,
    /// Encoder input: template and context
    pub input_token_ids: Vec<u32>,
    pub input_attn_mask: Vec<u32>,
    /// Decoder target: filled template, starting with <s>
    pub tgt_token_ids:   Vec<u32>,
    pub tgt_attn_mask:   Vec<u32>,
}

pub struct ArgumentDataset {
    samples: Vec<ArgumentSample>,
}

impl ArgumentDataset {
    pub fn new(samples: Vec<ArgumentSample>) -> Self { Self { samples } }

    /// Read one JSON object per line; blank lines are skipped.
    pub fn from_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Cannot open dataset '{}'", path.display()))?;

        let mut samples = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let sample: ArgumentSample = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: malformed example", path.display(), line_no + 1))?;
            samples.push(sample);
        }

        tracing::info!("Loaded {} examples from '{}'", samples.len(), path.display());
        Ok(Self { samples })
    }

    /// Number of batches one pass over the data yields.
    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.samples.len().div_ceil(batch_size.max(1))
    }
}

impl Dataset<ArgumentSample> for ArgumentDataset {
    fn get(&self, index: usize) -> Option<ArgumentSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_jsonl_and_counts_batches() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for key in ["a", "b", "c"] {
            writeln!(
                file,
                r#"{{"doc_key":"{key}","input_token_ids":[0,5,2],"input_attn_mask":[1,1,1],"tgt_token_ids":[0,6,2],"tgt_attn_mask":[1,1,1]}}"#
            ).unwrap();
        }
        writeln!(file).unwrap();

        let ds = ArgumentDataset::from_jsonl(file.path()).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.get(1).unwrap().doc_key, "b");
        assert_eq!(ds.num_batches(2), 2);
    }

    #[test]
    fn reports_line_of_malformed_example() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"doc_key\": 3}}").unwrap();
        let err = ArgumentDataset::from_jsonl(file.path()).err().unwrap();
        assert!(format!("{err}").contains(":1:"));
    }
}
