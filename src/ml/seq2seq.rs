// ============================================================
// Layer 5 — Seq2Seq Model Contract
// ============================================================
// Both model variants (gen, pointer) implement ArgumentGenerator,
// so the orchestrator, the trainer and the decoder are written
// once against this trait.
//
// A variant only supplies:
//   encode           input ids → encoder state
//   token_log_probs  decoder ids → log p(next token) per position
//
// forward() (shifted-target loss) is shared and built on top.

use anyhow::{bail, Result};
use burn::{
    module::{Module, ParamId},
    prelude::*,
    tensor::activation::log_softmax,
};

use crate::domain::config::ModelVariant;
use crate::ml::bart::{BartConfig, BartRecord};

/// Task selector for the generation objective.
pub const TASK_GENERATION: usize = 0;

/// Model inputs for one pass over full target sequences.
#[derive(Debug, Clone)]
pub struct Seq2SeqInput<B: Backend> {
    /// [batch, src_len]
    pub input_ids:              Tensor<B, 2, Int>,
    /// [batch, src_len], 1 = token, 0 = padding
    pub attention_mask:         Tensor<B, 2, Int>,
    /// Full target sequence [batch, tgt_len]; shifted inside forward
    pub decoder_input_ids:      Tensor<B, 2, Int>,
    /// [batch, tgt_len]
    pub decoder_attention_mask: Tensor<B, 2, Int>,
    pub task:                   usize,
}

pub struct Seq2SeqOutput<B: Backend> {
    /// Mean token negative log-likelihood per example, [batch]
    pub loss: Tensor<B, 1>,
}

/// Encoder output kept around while decoding.
#[derive(Debug, Clone)]
pub struct EncoderState<B: Backend> {
    /// [batch, src_len, d_model]
    pub hidden:    Tensor<B, 3>,
    /// [batch, src_len], true = padding
    pub pad_mask:  Tensor<B, 2, Bool>,
    /// [batch, src_len]
    pub input_ids: Tensor<B, 2, Int>,
}

pub trait ArgumentGenerator<B: Backend>: Module<B> + Clone + Send + core::fmt::Debug + 'static {
    /// The configured variant this type implements.
    const VARIANT: ModelVariant;

    fn init(config: &BartConfig, device: &B::Device) -> Self;

    fn encode(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> EncoderState<B>;

    /// [batch, tgt_len] decoder ids → [batch, tgt_len, vocab] log-probabilities.
    fn token_log_probs(
        &self,
        encoder:                &EncoderState<B>,
        decoder_input_ids:      Tensor<B, 2, Int>,
        decoder_attention_mask: Option<Tensor<B, 2, Int>>,
    ) -> Tensor<B, 3>;

    /// Replace the encoder-decoder weights, e.g. with imported pretrained ones.
    fn load_backbone(self, record: BartRecord<B>) -> Self;

    fn resize_token_embeddings(self, vocab_size: usize) -> Self;

    fn named_parameters(&self) -> Vec<(String, ParamId)>;

    fn vocab_size(&self) -> usize;

    fn pad_token_id(&self) -> usize;

    /// Shifted-target loss: the decoder reads tgt[:, :-1] and is scored
    /// against tgt[:, 1:]; padded labels do not count.
    fn forward(&self, input: Seq2SeqInput<B>) -> Result<Seq2SeqOutput<B>> {
        if input.task != TASK_GENERATION {
            bail!("unsupported task selector {}", input.task);
        }
        let [batch, tgt_len] = input.decoder_input_ids.dims();
        if tgt_len < 2 {
            bail!("target sequences need at least two tokens, got {tgt_len}");
        }

        let encoder = self.encode(input.input_ids, input.attention_mask);

        let decoder_ids  = input.decoder_input_ids.clone().slice([0..batch, 0..tgt_len - 1]);
        let decoder_mask = input.decoder_attention_mask.slice([0..batch, 0..tgt_len - 1]);
        let labels       = input.decoder_input_ids.slice([0..batch, 1..tgt_len]);

        let log_probs = self.token_log_probs(&encoder, decoder_ids, Some(decoder_mask));

        let label_mask = labels.clone().equal_elem(self.pad_token_id() as i64).bool_not().float();
        let nll = log_probs
            .gather(2, labels.unsqueeze_dim::<3>(2))
            .squeeze::<2>(2)
            .neg();

        let token_count = label_mask.clone().sum_dim(1).clamp_min(1.0);
        let loss = (nll * label_mask).sum_dim(1).div(token_count).reshape([batch]);

        Ok(Seq2SeqOutput { loss })
    }
}

/// Log-softmax over the vocabulary dimension.
pub fn vocab_log_softmax<B: Backend>(logits: Tensor<B, 3>) -> Tensor<B, 3> {
    log_softmax(logits, 2)
}
