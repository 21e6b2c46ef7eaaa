// ============================================================
// Layer 5 — Generation
// ============================================================
// Autoregressive decoding for any ArgumentGenerator:
//
//   1. Encode the inputs once (mask derived from pad tokens)
//   2. Start every row with decoder_start_token_id
//   3. Score the last position, pick the next token
//        Greedy  → argmax
//        Sample  → top-k, then nucleus (top-p), then draw
//   4. Stop when every row emitted EOS or max_length is hit;
//      finished rows are padded with pad_token_id
//
// Only single-beam decoding is supported.

use anyhow::{bail, Result};
use burn::prelude::*;
use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng};

use crate::ml::seq2seq::ArgumentGenerator;

pub const MAX_LENGTH: usize = 30;
pub const TOP_K: usize = 20;
pub const TOP_P: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodingPolicy {
    Greedy,
    Sample { top_k: usize, top_p: f64 },
}

impl DecodingPolicy {
    /// `sample_gen` selects nucleus sampling, otherwise greedy.
    pub fn from_flag(sample_gen: bool) -> Self {
        if sample_gen {
            Self::Sample { top_k: TOP_K, top_p: TOP_P }
        } else {
            Self::Greedy
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub policy:                 DecodingPolicy,
    /// Includes the decoder start token
    pub max_length:             usize,
    pub num_return_sequences:   usize,
    pub num_beams:              usize,
    pub decoder_start_token_id: u32,
    pub eos_token_id:           u32,
    pub pad_token_id:           u32,
}

impl GenerationConfig {
    pub fn new(policy: DecodingPolicy, decoder_start_token_id: u32, eos_token_id: u32, pad_token_id: u32) -> Self {
        Self {
            policy,
            max_length: MAX_LENGTH,
            num_return_sequences: 1,
            num_beams: 1,
            decoder_start_token_id,
            eos_token_id,
            pad_token_id,
        }
    }
}

/// Decode `input_ids` [batch, src_len] into
/// [batch * num_return_sequences, out_len] token ids, out_len <= max_length.
pub fn generate<B, M>(
    model:     &M,
    input_ids: Tensor<B, 2, Int>,
    cfg:       &GenerationConfig,
    rng:       &mut StdRng,
) -> Result<Tensor<B, 2, Int>>
where
    B: Backend,
    M: ArgumentGenerator<B>,
{
    if cfg.num_beams != 1 {
        bail!("beam search is not supported (num_beams = {})", cfg.num_beams);
    }
    if cfg.num_return_sequences == 0 {
        bail!("num_return_sequences must be at least 1");
    }
    if cfg.policy == DecodingPolicy::Greedy && cfg.num_return_sequences != 1 {
        bail!("greedy decoding returns exactly one sequence per input");
    }

    let device = input_ids.device();
    let [batch, src_len] = input_ids.dims();
    let rows = batch * cfg.num_return_sequences;

    let input_ids = input_ids
        .reshape([batch, 1, src_len])
        .expand([batch, cfg.num_return_sequences, src_len])
        .reshape([rows, src_len]);
    let attention_mask = input_ids.clone().equal_elem(cfg.pad_token_id as i64).bool_not().int();
    let encoder = model.encode(input_ids, attention_mask);

    let mut sequences: Vec<Vec<u32>> = vec![vec![cfg.decoder_start_token_id]; rows];
    let mut finished = vec![false; rows];

    while sequences[0].len() < cfg.max_length && !finished.iter().all(|&f| f) {
        let len = sequences[0].len();
        let flat: Vec<i64> = sequences.iter().flatten().map(|&t| t as i64).collect();
        let decoder_ids = Tensor::<B, 2, Int>::from_data(TensorData::new(flat, [rows, len]), &device);

        let log_probs = model.token_log_probs(&encoder, decoder_ids, None);
        let vocab = log_probs.dims()[2];
        let last: Vec<f32> = log_probs
            .slice([0..rows, len - 1..len, 0..vocab])
            .reshape([rows * vocab])
            .into_data()
            .iter::<f32>()
            .collect();

        for (row, scores) in last.chunks(vocab).enumerate() {
            if finished[row] {
                sequences[row].push(cfg.pad_token_id);
                continue;
            }
            let token = match cfg.policy {
                DecodingPolicy::Greedy => argmax(scores),
                DecodingPolicy::Sample { top_k, top_p } => sample(scores, top_k, top_p, rng)?,
            };
            sequences[row].push(token);
            finished[row] = token == cfg.eos_token_id;
        }
    }

    let out_len = sequences[0].len();
    let flat: Vec<i64> = sequences.into_iter().flatten().map(|t| t as i64).collect();
    Ok(Tensor::from_data(TensorData::new(flat, [rows, out_len]), &device))
}

fn argmax(scores: &[f32]) -> u32 {
    scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

/// Candidate (token, probability) pairs surviving top-k then top-p
/// filtering, highest score first. Probabilities are renormalised over
/// the top-k set; the token that crosses `top_p` is kept.
pub fn filter_candidates(scores: &[f32], top_k: usize, top_p: f64) -> Vec<(u32, f64)> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    if top_k > 0 {
        order.truncate(top_k);
    }

    let max = order.first().map(|&i| scores[i] as f64).unwrap_or(0.0);
    let weights: Vec<f64> = order.iter().map(|&i| (scores[i] as f64 - max).exp()).collect();
    let total: f64 = weights.iter().sum();

    let mut kept = Vec::new();
    let mut cumulative = 0.0;
    for (&token, weight) in order.iter().zip(weights) {
        if !kept.is_empty() && cumulative >= top_p {
            break;
        }
        let prob = weight / total;
        cumulative += prob;
        kept.push((token as u32, prob));
    }
    kept
}

fn sample(scores: &[f32], top_k: usize, top_p: f64, rng: &mut StdRng) -> Result<u32> {
    let candidates = filter_candidates(scores, top_k, top_p);
    let dist = WeightedIndex::new(candidates.iter().map(|(_, p)| *p))
        .map_err(|e| anyhow::anyhow!("cannot sample next token: {e}"))?;
    Ok(candidates[dist.sample(rng)].0)
}
