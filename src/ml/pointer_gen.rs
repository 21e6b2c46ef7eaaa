// ============================================================
// Layer 5 — BartPointerGen (variant "pointer")
// ============================================================
// BART with a copy mechanism. At every decoder position:
//
//   p_vocab = softmax(lm_logits)                     [vocab]
//   a       = last-layer cross-attention             [src_len]
//   c       = a · encoder_hidden                     [d_model]
//   p_gen   = sigmoid(W [h; c])                      scalar
//   p_copy  = a scattered onto the input token ids   [vocab]
//
//   p(w)    = p_gen · p_vocab(w) + (1 - p_gen) · p_copy(w)
//
// Reference: See et al. (2017) Get To The Point

use burn::{
    module::{Param, ParamId},
    nn::{Linear, LinearConfig},
    prelude::*,
    tensor::activation::{sigmoid, softmax},
};

use crate::domain::config::ModelVariant;
use crate::ml::{
    bart::{pad_mask_from_attention, Bart, BartConfig, BartRecord},
    bart_gen::resize_bias,
    params::NamedParams,
    seq2seq::{ArgumentGenerator, EncoderState},
};

/// Floor applied before taking the log of the mixed distribution.
const MIN_PROB: f64 = 1e-12;

#[derive(Module, Debug)]
pub struct BartPointerGen<B: Backend> {
    pub model:             Bart<B>,
    /// [1, vocab]
    pub final_logits_bias: Param<Tensor<B, 2>>,
    /// [h; c] (2 * d_model) → 1
    pub p_gen:             Linear<B>,
    init_std:              f64,
}

impl<B: Backend> ArgumentGenerator<B> for BartPointerGen<B> {
    const VARIANT: ModelVariant = ModelVariant::Pointer;

    fn init(config: &BartConfig, device: &B::Device) -> Self {
        Self {
            model:             config.init(device),
            final_logits_bias: Param::from_tensor(Tensor::zeros([1, config.vocab_size], device)),
            p_gen:             LinearConfig::new(2 * config.d_model, 1).init(device),
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
        let [batch, tgt_len, _] = decoded.hidden.dims();
        let src_len = encoder.input_ids.dims()[1];

        let attention = decoded.cross_attention;                          // [batch, tgt, src]
        let context   = attention.clone().matmul(encoder.hidden.clone()); // [batch, tgt, d_model]
        let p_gen     = sigmoid(self.p_gen.forward(Tensor::cat(vec![decoded.hidden.clone(), context], 2)));

        let logits = self.model.lm_logits(decoded.hidden, self.final_logits_bias.val());
        let vocab  = logits.dims()[2];
        let p_vocab = softmax(logits, 2);

        let copy_ids = encoder.input_ids
            .clone()
            .reshape([batch, 1, src_len])
            .expand([batch, tgt_len, src_len]);
        let p_copy = Tensor::<B, 3>::zeros([batch, tgt_len, vocab], &p_vocab.device())
            .scatter(2, copy_ids, attention);

        let gate = p_gen.expand([batch, tgt_len, vocab]);
        let mixed = p_vocab * gate.clone() + p_copy * gate.neg().add_scalar(1.0);
        mixed.clamp_min(MIN_PROB).log()
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
        params.linear("p_gen", &self.p_gen);
        params.into_vec()
    }

    fn vocab_size(&self) -> usize {
        self.model.vocab_size()
    }

    fn pad_token_id(&self) -> usize {
        self.model.pad_token_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::bart::tests::tiny_config;
    use burn::backend::NdArray;

    type TB = NdArray;

    #[test]
    fn mixed_distribution_sums_to_one() {
        let device = Default::default();
        let model = BartPointerGen::<TB>::init(&tiny_config(12), &device);

        let input = Tensor::<TB, 2, Int>::from_data(TensorData::new(vec![0i64, 5, 6, 2], [1, 4]), &device);
        let mask  = Tensor::<TB, 2, Int>::ones([1, 4], &device);
        let state = model.encode(input, mask);

        let dec = Tensor::<TB, 2, Int>::from_data(TensorData::new(vec![2i64, 0], [1, 2]), &device);
        let log_probs = model.token_log_probs(&state, dec, None);
        assert_eq!(log_probs.dims(), [1, 2, 12]);

        let totals: Vec<f32> = log_probs.exp().sum_dim(2).into_data().iter::<f32>().collect();
        for total in totals {
            assert!((total - 1.0).abs() < 1e-4, "got {total}");
        }
    }

    #[test]
    fn exposes_gate_parameters() {
        let model = BartPointerGen::<TB>::init(&tiny_config(12), &Default::default());
        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"p_gen.weight".to_string()));
        assert!(names.contains(&"p_gen.bias".to_string()));
    }
}
