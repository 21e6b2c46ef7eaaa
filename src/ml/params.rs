// ============================================================
// Layer 5 — Parameter Names
// ============================================================
// Pairs each Burn parameter with its pretrained (HuggingFace)
// dotted name, e.g. `model.encoder.layers.0.fc1.bias`.
// The optimizer groups parameters by these names.

use burn::{
    module::{Param, ParamId},
    nn::{Embedding, LayerNorm, Linear},
    prelude::*,
};

/// Dotted parameter names paired with Burn parameter ids,
/// in the HuggingFace naming scheme (`*.weight`, `*.bias`).
#[derive(Debug, Default)]
pub struct NamedParams {
    entries: Vec<(String, ParamId)>,
}

impl NamedParams {
    pub fn push<B: Backend, const D: usize>(&mut self, name: impl Into<String>, param: &Param<Tensor<B, D>>) {
        self.entries.push((name.into(), param.id.clone()));
    }

    pub fn linear<B: Backend>(&mut self, prefix: &str, linear: &Linear<B>) {
        self.push(format!("{prefix}.weight"), &linear.weight);
        if let Some(bias) = &linear.bias {
            self.push(format!("{prefix}.bias"), bias);
        }
    }

    pub fn layer_norm<B: Backend>(&mut self, prefix: &str, norm: &LayerNorm<B>) {
        self.push(format!("{prefix}.weight"), &norm.gamma);
        self.push(format!("{prefix}.bias"), &norm.beta);
    }

    pub fn embedding<B: Backend>(&mut self, prefix: &str, embedding: &Embedding<B>) {
        self.push(format!("{prefix}.weight"), &embedding.weight);
    }

    pub fn into_vec(self) -> Vec<(String, ParamId)> {
        self.entries
    }
}
