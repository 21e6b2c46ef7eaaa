// ============================================================
// Layer 5 — BartGen (variant "gen")
// ============================================================
// BART conditional generation: decoder states are projected
// onto the vocabulary through the shared embedding matrix plus
// a per-token bias.

use burn::{
    module::{Param, ParamId},
    prelude::*,
};

use crate::domain::config::ModelVariant;
use crate::ml::{
    bart::{pad_mask_from_attention, Bart, BartConfig, BartRecord},
    params::NamedParams,
    seq2seq::{vocab_log_softmax, ArgumentGenerator, EncoderState},
};

#[derive(Module, Debug)]
pub struct BartGen<B: Backend> {
    pub model:             Bart<B>,
    /// [1, vocab]
    pub final_logits_bias: Param<Tensor<B, 2>>,
    init_std:              f64,
}

impl<B: Backend> ArgumentGenerator<B> for BartGen<B> {
    const VARIANT: ModelVariant = ModelVariant::Gen;

    fn init(config: &BartConfig, device: &B::Device) -> Self {
        Self {
            model:             config.init(device),
            final_logits_bias: Param::from_tensor(Tensor::zeros([1, config.vocab_size], device)),
            init_std:          config.init_std,
        }
    }

    fn encode(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> EncoderState<B> {
        let pad_mask = pad_mask_from_attention(attention_mask);
        EncoderState {
            hidden: self.model.encode(input_ids.clone(), pad_mask.clone()),
            pad_mask,
            input_ids,
        }
    }

    fn token_log_probs(
        &self,
        encoder:                &EncoderState<B>,
        decoder_input_ids:      Tensor<B, 2, Int>,
        decoder_attention_mask: Option<Tensor<B, 2, Int>>,
    ) -> Tensor<B, 3> {
        let decoded = self.model.decode(
            decoder_input_ids,
            decoder_attention_mask.map(pad_mask_from_attention),
            encoder.hidden.clone(),
            encoder.pad_mask.clone(),
        );
        vocab_log_softmax(self.model.lm_logits(decoded.hidden, self.final_logits_bias.val()))
    }

    fn load_backbone(mut self, record: BartRecord<B>) -> Self {
        self.model = self.model.load_record(record);
        self
    }

    fn resize_token_embeddings(mut self, vocab_size: usize) -> Self {
        self.model = self.model.resize_token_embeddings(vocab_size, self.init_std);
        self.final_logits_bias = Param::from_tensor(resize_bias(self.final_logits_bias.val(), vocab_size));
        self
    }

    fn named_parameters(&self) -> Vec<(String, ParamId)> {
        let mut params = NamedParams::default();
        self.model.collect_params("model", &mut params);
        params.push("final_logits_bias", &self.final_logits_bias);
        params.into_vec()
    }

    fn vocab_size(&self) -> usize {
        self.model.vocab_size()
    }

    fn pad_token_id(&self) -> usize {
        self.model.pad_token_id
    }
}

/// Zero-extend or truncate a [1, vocab] bias row.
pub(crate) fn resize_bias<B: Backend>(bias: Tensor<B, 2>, vocab_size: usize) -> Tensor<B, 2> {
    let old = bias.dims()[1];
    if vocab_size > old {
        let extra = Tensor::zeros([1, vocab_size - old], &bias.device());
        Tensor::cat(vec![bias, extra], 1)
    } else {
        bias.slice([0..1, 0..vocab_size])
    }
}
