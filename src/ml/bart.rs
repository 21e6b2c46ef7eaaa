// ============================================================
// Layer 5 — BART Encoder-Decoder
// ============================================================
// The pretrained sequence-to-sequence backbone shared by both
// model variants, assembled from Burn building blocks.
//
// Field names follow the HuggingFace parameter layout
// (shared, encoder.layers.N.self_attn.q_proj, ...) so that
// pytorch_model.bin weights map onto this module directly.
//
//   shared                    token embeddings (tied LM head)
//   encoder / decoder
//     embed_positions         learned positions, offset by 2
//     layernorm_embedding
//     layers[N]
//       self_attn             (+ encoder_attn in the decoder)
//       *_layer_norm          post-norm after every sublayer
//       fc1 → GELU → fc2
//
// Reference: Lewis et al. (2020) BART
//            Burn Book §3 (Building Blocks)

use burn::{
    module::Param,
    nn::{
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Initializer,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::{
        activation::{gelu, softmax},
        Distribution,
    },
};

use crate::ml::params::NamedParams;

/// BART learned positional embeddings start at index 2.
const POSITION_OFFSET: usize = 2;

/// Added to attention scores at masked positions.
const MASK_VALUE: f64 = -1.0e9;

// ─── Configuration ────────────────────────────────────────────────────────────
// Loaded from the pretrained config.json; keys not listed here
// are ignored. Defaults are the bart-large values.
#[derive(Config, Debug)]
pub struct BartConfig {
    #[config(default = 50265)]
    pub vocab_size: usize,
    #[config(default = 1024)]
    pub d_model: usize,
    #[config(default = 12)]
    pub encoder_layers: usize,
    #[config(default = 12)]
    pub decoder_layers: usize,
    #[config(default = 16)]
    pub encoder_attention_heads: usize,
    #[config(default = 16)]
    pub decoder_attention_heads: usize,
    #[config(default = 4096)]
    pub encoder_ffn_dim: usize,
    #[config(default = 4096)]
    pub decoder_ffn_dim: usize,
    #[config(default = 1024)]
    pub max_position_embeddings: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = 0.0)]
    pub attention_dropout: f64,
    #[config(default = 0.0)]
    pub activation_dropout: f64,
    #[config(default = false)]
    pub scale_embedding: bool,
    #[config(default = 0.02)]
    pub init_std: f64,
    #[config(default = 0)]
    pub bos_token_id: u32,
    #[config(default = 1)]
    pub pad_token_id: u32,
    #[config(default = 2)]
    pub eos_token_id: u32,
    #[config(default = 2)]
    pub decoder_start_token_id: u32,
}

impl BartConfig {
    fn initializer(&self) -> Initializer {
        Initializer::Normal { mean: 0.0, std: self.init_std }
    }

    fn linear<B: Backend>(&self, d_in: usize, d_out: usize, device: &B::Device) -> Linear<B> {
        LinearConfig::new(d_in, d_out)
            .with_initializer(self.initializer())
            .init(device)
    }

    fn layer_norm<B: Backend>(&self, device: &B::Device) -> LayerNorm<B> {
        LayerNormConfig::new(self.d_model).with_epsilon(1e-5).init(device)
    }

    fn positions<B: Backend>(&self, device: &B::Device) -> Embedding<B> {
        EmbeddingConfig::new(self.max_position_embeddings + POSITION_OFFSET, self.d_model)
            .with_initializer(self.initializer())
            .init(device)
    }

    fn embed_scale(&self) -> f64 {
        if self.scale_embedding { (self.d_model as f64).sqrt() } else { 1.0 }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Bart<B> {
        let shared = EmbeddingConfig::new(self.vocab_size, self.d_model)
            .with_initializer(self.initializer())
            .init(device);

        let encoder = BartEncoder {
            embed_positions:     self.positions(device),
            layers:              (0..self.encoder_layers).map(|_| self.encoder_layer(device)).collect(),
            layernorm_embedding: self.layer_norm(device),
            dropout:             DropoutConfig::new(self.dropout).init(),
            embed_scale:         self.embed_scale(),
        };
        let decoder = BartDecoder {
            embed_positions:     self.positions(device),
            layers:              (0..self.decoder_layers).map(|_| self.decoder_layer(device)).collect(),
            layernorm_embedding: self.layer_norm(device),
            dropout:             DropoutConfig::new(self.dropout).init(),
            embed_scale:         self.embed_scale(),
        };

        Bart { shared, encoder, decoder, pad_token_id: self.pad_token_id as usize }
    }

    fn attention<B: Backend>(&self, num_heads: usize, device: &B::Device) -> BartAttention<B> {
        BartAttention {
            q_proj:    self.linear(self.d_model, self.d_model, device),
            k_proj:    self.linear(self.d_model, self.d_model, device),
            v_proj:    self.linear(self.d_model, self.d_model, device),
            out_proj:  self.linear(self.d_model, self.d_model, device),
            dropout:   DropoutConfig::new(self.attention_dropout).init(),
            num_heads,
        }
    }

    fn encoder_layer<B: Backend>(&self, device: &B::Device) -> BartEncoderLayer<B> {
        BartEncoderLayer {
            self_attn:            self.attention(self.encoder_attention_heads, device),
            self_attn_layer_norm: self.layer_norm(device),
            fc1:                  self.linear(self.d_model, self.encoder_ffn_dim, device),
            fc2:                  self.linear(self.encoder_ffn_dim, self.d_model, device),
            final_layer_norm:     self.layer_norm(device),
            dropout:              DropoutConfig::new(self.dropout).init(),
            activation_dropout:   DropoutConfig::new(self.activation_dropout).init(),
        }
    }

    fn decoder_layer<B: Backend>(&self, device: &B::Device) -> BartDecoderLayer<B> {
        BartDecoderLayer {
            self_attn:               self.attention(self.decoder_attention_heads, device),
            self_attn_layer_norm:    self.layer_norm(device),
            encoder_attn:            self.attention(self.decoder_attention_heads, device),
            encoder_attn_layer_norm: self.layer_norm(device),
            fc1:                     self.linear(self.d_model, self.decoder_ffn_dim, device),
            fc2:                     self.linear(self.decoder_ffn_dim, self.d_model, device),
            final_layer_norm:        self.layer_norm(device),
            dropout:                 DropoutConfig::new(self.dropout).init(),
            activation_dropout:      DropoutConfig::new(self.activation_dropout).init(),
        }
    }
}

// ─── Attention masks ──────────────────────────────────────────────────────────
/// [batch, keys] padding mask (true = padded) → additive bias [batch, 1, 1, keys].
pub fn padding_bias<B: Backend>(pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 4> {
    let [batch, keys] = pad_mask.dims();
    pad_mask.float().mul_scalar(MASK_VALUE).reshape([batch, 1, 1, keys])
}

/// Additive bias [1, 1, len, len] hiding future positions.
pub fn causal_bias<B: Backend>(len: usize, device: &B::Device) -> Tensor<B, 4> {
    let idx  = Tensor::<B, 1, Int>::arange(0..len as i64, device);
    let rows = idx.clone().reshape([len, 1]).expand([len, len]);
    let cols = idx.reshape([1, len]).expand([len, len]);
    cols.greater(rows).float().mul_scalar(MASK_VALUE).reshape([1, 1, len, len])
}

/// Padding mask (true = padded) from a 1/0 attention mask.
pub fn pad_mask_from_attention<B: Backend>(attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2, Bool> {
    attention_mask.equal_elem(0)
}

// ─── Attention ────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BartAttention<B: Backend> {
    pub q_proj:   Linear<B>,
    pub k_proj:   Linear<B>,
    pub v_proj:   Linear<B>,
    pub out_proj: Linear<B>,
    dropout:      Dropout,
    num_heads:    usize,
}

impl<B: Backend> BartAttention<B> {
    /// query: [batch, q_len, d_model], key_value: [batch, k_len, d_model].
    /// Each bias broadcasts to [batch, heads, q_len, k_len].
    ///
    /// Returns the attended output and the attention weights
    /// averaged over heads, [batch, q_len, k_len].
    pub fn forward(
        &self,
        query:     Tensor<B, 3>,
        key_value: Tensor<B, 3>,
        biases:    &[Tensor<B, 4>],
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [batch, q_len, d_model] = query.dims();
        let k_len    = key_value.dims()[1];
        let heads    = self.num_heads;
        let head_dim = d_model / heads;

        let q = self.q_proj
            .forward(query)
            .mul_scalar((head_dim as f64).powf(-0.5))
            .reshape([batch, q_len, heads, head_dim])
            .swap_dims(1, 2);
        let k = self.k_proj
            .forward(key_value.clone())
            .reshape([batch, k_len, heads, head_dim])
            .swap_dims(1, 2);
        let v = self.v_proj
            .forward(key_value)
            .reshape([batch, k_len, heads, head_dim])
            .swap_dims(1, 2);

        let mut scores = q.matmul(k.swap_dims(2, 3)); // [batch, heads, q_len, k_len]
        for bias in biases {
            scores = scores + bias.clone().expand([batch, heads, q_len, k_len]);
        }
        let weights = softmax(scores, 3);

        let context = self.dropout
            .forward(weights.clone())
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, q_len, d_model]);
        let averaged = weights.mean_dim(1).reshape([batch, q_len, k_len]);

        (self.out_proj.forward(context), averaged)
    }

    fn collect_params(&self, prefix: &str, out: &mut NamedParams) {
        out.linear(&format!("{prefix}.q_proj"), &self.q_proj);
        out.linear(&format!("{prefix}.k_proj"), &self.k_proj);
        out.linear(&format!("{prefix}.v_proj"), &self.v_proj);
        out.linear(&format!("{prefix}.out_proj"), &self.out_proj);
    }
}

// ─── Encoder ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BartEncoderLayer<B: Backend> {
    pub self_attn:            BartAttention<B>,
    pub self_attn_layer_norm: LayerNorm<B>,
    pub fc1:                  Linear<B>,
    pub fc2:                  Linear<B>,
    pub final_layer_norm:     LayerNorm<B>,
    dropout:                  Dropout,
    activation_dropout:       Dropout,
}

impl<B: Backend> BartEncoderLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, pad_bias: &Tensor<B, 4>) -> Tensor<B, 3> {
        let (attn, _) = self.self_attn.forward(x.clone(), x.clone(), std::slice::from_ref(pad_bias));
        let x = self.self_attn_layer_norm.forward(x + self.dropout.forward(attn));

        let hidden = self.activation_dropout.forward(gelu(self.fc1.forward(x.clone())));
        let ffn_out = self.dropout.forward(self.fc2.forward(hidden));
        self.final_layer_norm.forward(x + ffn_out)
    }
}

#[derive(Module, Debug)]
pub struct BartEncoder<B: Backend> {
    pub embed_positions:     Embedding<B>,
    pub layers:              Vec<BartEncoderLayer<B>>,
    pub layernorm_embedding: LayerNorm<B>,
    dropout:                 Dropout,
    embed_scale:             f64,
}

impl<B: Backend> BartEncoder<B> {
    /// token_embeds: [batch, len, d_model] → hidden states of the same shape
    pub fn forward(&self, token_embeds: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let x = embed_with_positions(&self.embed_positions, token_embeds, self.embed_scale);
        let mut x = self.dropout.forward(self.layernorm_embedding.forward(x));

        let pad_bias = padding_bias(pad_mask);
        for layer in &self.layers {
            x = layer.forward(x, &pad_bias);
        }
        x
    }
}

// ─── Decoder ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BartDecoderLayer<B: Backend> {
    pub self_attn:               BartAttention<B>,
    pub self_attn_layer_norm:    LayerNorm<B>,
    pub encoder_attn:            BartAttention<B>,
    pub encoder_attn_layer_norm: LayerNorm<B>,
    pub fc1:                     Linear<B>,
    pub fc2:                     Linear<B>,
    pub final_layer_norm:        LayerNorm<B>,
    dropout:                     Dropout,
    activation_dropout:          Dropout,
}

impl<B: Backend> BartDecoderLayer<B> {
    /// Returns the new hidden states and the cross-attention weights.
    pub fn forward(
        &self,
        x:            Tensor<B, 3>,
        self_biases:  &[Tensor<B, 4>],
        memory:       Tensor<B, 3>,
        memory_bias:  &Tensor<B, 4>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let (attn, _) = self.self_attn.forward(x.clone(), x.clone(), self_biases);
        let x = self.self_attn_layer_norm.forward(x + self.dropout.forward(attn));

        let (cross, cross_weights) =
            self.encoder_attn.forward(x.clone(), memory, std::slice::from_ref(memory_bias));
        let x = self.encoder_attn_layer_norm.forward(x + self.dropout.forward(cross));

        let hidden = self.activation_dropout.forward(gelu(self.fc1.forward(x.clone())));
        let ffn_out = self.dropout.forward(self.fc2.forward(hidden));
        (self.final_layer_norm.forward(x + ffn_out), cross_weights)
    }
}

#[derive(Module, Debug)]
pub struct BartDecoder<B: Backend> {
    pub embed_positions:     Embedding<B>,
    pub layers:              Vec<BartDecoderLayer<B>>,
    pub layernorm_embedding: LayerNorm<B>,
    dropout:                 Dropout,
    embed_scale:             f64,
}

/// Decoder hidden states plus the last layer's cross-attention.
pub struct DecoderOutput<B: Backend> {
    /// [batch, tgt_len, d_model]
    pub hidden:          Tensor<B, 3>,
    /// [batch, tgt_len, src_len], averaged over heads
    pub cross_attention: Tensor<B, 3>,
}

impl<B: Backend> BartDecoder<B> {
    pub fn forward(
        &self,
        token_embeds:    Tensor<B, 3>,
        pad_mask:        Option<Tensor<B, 2, Bool>>,
        memory:          Tensor<B, 3>,
        memory_pad_mask: Tensor<B, 2, Bool>,
    ) -> DecoderOutput<B> {
        let [batch, tgt_len, _] = token_embeds.dims();
        let [_, src_len, _]     = memory.dims();
        let device = token_embeds.device();

        let x = embed_with_positions(&self.embed_positions, token_embeds, self.embed_scale);
        let mut x = self.dropout.forward(self.layernorm_embedding.forward(x));

        let mut self_biases = vec![causal_bias::<B>(tgt_len, &device)];
        if let Some(mask) = pad_mask {
            self_biases.push(padding_bias(mask));
        }
        let memory_bias = padding_bias(memory_pad_mask);

        let mut cross_attention = Tensor::zeros([batch, tgt_len, src_len], &device);
        for layer in &self.layers {
            let (next, weights) = layer.forward(x, &self_biases, memory.clone(), &memory_bias);
            x = next;
            cross_attention = weights;
        }

        DecoderOutput { hidden: x, cross_attention }
    }
}

fn embed_with_positions<B: Backend>(
    positions:    &Embedding<B>,
    token_embeds: Tensor<B, 3>,
    embed_scale:  f64,
) -> Tensor<B, 3> {
    let [batch, len, _] = token_embeds.dims();
    let ids = Tensor::<B, 1, Int>::arange(
        POSITION_OFFSET as i64..(len + POSITION_OFFSET) as i64,
        &token_embeds.device(),
    )
    .reshape([1, len])
    .expand([batch, len]);

    token_embeds.mul_scalar(embed_scale) + positions.forward(ids)
}

// ─── Bart ─────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Bart<B: Backend> {
    pub shared:  Embedding<B>,
    pub encoder: BartEncoder<B>,
    pub decoder: BartDecoder<B>,
    pub pad_token_id: usize,
}

impl<B: Backend> Bart<B> {
    pub fn vocab_size(&self) -> usize {
        self.shared.weight.val().dims()[0]
    }

    /// input_ids: [batch, src_len] → [batch, src_len, d_model]
    pub fn encode(&self, input_ids: Tensor<B, 2, Int>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        self.encoder.forward(self.shared.forward(input_ids), pad_mask)
    }

    pub fn decode(
        &self,
        decoder_input_ids: Tensor<B, 2, Int>,
        pad_mask:          Option<Tensor<B, 2, Bool>>,
        memory:            Tensor<B, 3>,
        memory_pad_mask:   Tensor<B, 2, Bool>,
    ) -> DecoderOutput<B> {
        self.decoder.forward(self.shared.forward(decoder_input_ids), pad_mask, memory, memory_pad_mask)
    }

    /// Project decoder states onto the vocabulary with the tied
    /// embedding matrix: [batch, len, d_model] → [batch, len, vocab].
    pub fn lm_logits(&self, hidden: Tensor<B, 3>, final_logits_bias: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, len, d_model] = hidden.dims();
        let vocab = self.vocab_size();

        let logits = hidden
            .reshape([batch * len, d_model])
            .matmul(self.shared.weight.val().transpose())
            .reshape([batch, len, vocab]);
        logits + final_logits_bias.reshape([1, 1, vocab]).expand([batch, len, vocab])
    }

    /// Grow the token embedding table to `new_size` rows. Existing rows
    /// are kept, new rows are drawn from N(0, init_std).
    pub fn resize_token_embeddings(mut self, new_size: usize, init_std: f64) -> Self {
        let weight = self.shared.weight.val();
        let [old_size, d_model] = weight.dims();
        if new_size == old_size {
            return self;
        }

        let device  = weight.device();
        let resized = if new_size > old_size {
            let extra = Tensor::<B, 2>::random(
                [new_size - old_size, d_model],
                Distribution::Normal(0.0, init_std),
                &device,
            );
            Tensor::cat(vec![weight, extra], 0)
        } else {
            weight.slice([0..new_size, 0..d_model])
        };

        self.shared.weight = Param::from_tensor(resized);
        self
    }

    pub fn collect_params(&self, prefix: &str, out: &mut NamedParams) {
        out.embedding(&format!("{prefix}.shared"), &self.shared);

        let enc = format!("{prefix}.encoder");
        out.embedding(&format!("{enc}.embed_positions"), &self.encoder.embed_positions);
        out.layer_norm(&format!("{enc}.layernorm_embedding"), &self.encoder.layernorm_embedding);
        for (i, layer) in self.encoder.layers.iter().enumerate() {
            let p = format!("{enc}.layers.{i}");
            layer.self_attn.collect_params(&format!("{p}.self_attn"), out);
            out.layer_norm(&format!("{p}.self_attn_layer_norm"), &layer.self_attn_layer_norm);
            out.linear(&format!("{p}.fc1"), &layer.fc1);
            out.linear(&format!("{p}.fc2"), &layer.fc2);
            out.layer_norm(&format!("{p}.final_layer_norm"), &layer.final_layer_norm);
        }

        let dec = format!("{prefix}.decoder");
        out.embedding(&format!("{dec}.embed_positions"), &self.decoder.embed_positions);
        out.layer_norm(&format!("{dec}.layernorm_embedding"), &self.decoder.layernorm_embedding);
        for (i, layer) in self.decoder.layers.iter().enumerate() {
            let p = format!("{dec}.layers.{i}");
            layer.self_attn.collect_params(&format!("{p}.self_attn"), out);
            out.layer_norm(&format!("{p}.self_attn_layer_norm"), &layer.self_attn_layer_norm);
            layer.encoder_attn.collect_params(&format!("{p}.encoder_attn"), out);
            out.layer_norm(&format!("{p}.encoder_attn_layer_norm"), &layer.encoder_attn_layer_norm);
            out.linear(&format!("{p}.fc1"), &layer.fc1);
            out.linear(&format!("{p}.fc2"), &layer.fc2);
            out.layer_norm(&format!("{p}.final_layer_norm"), &layer.final_layer_norm);
        }
    }
}
