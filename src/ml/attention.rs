// ============================================================
// Layer 5 — Bilinear Attention Fusion Network (BAFN)
// ============================================================
// Two attention levels, each scoring its inputs against a
// learned context vector c through its own learned matrix W:
//
//     score(x, c) = xᵀ W c
//
// W reconciles inputs and context of different widths, so token
// states (gru_hidden_dim) and line embeddings (bafn_hidden_dim)
// are both compared against bafn_hidden_dim-wide contexts.
//
//   token level  [F·L, T, H] ──softmax over real tokens──► pooled [F·L, H]
//                pooled ⊕ line summary ──linear+tanh──► line embedding [F·L, D]
//   line level   [F, L, D]   ──softmax over real lines──► file embedding [F, D]
//
// Masked positions are filled with a large negative score before
// the softmax and multiplied by the mask afterwards, so padding
// gets weight exactly 0 and never enters the normalisation.

use burn::{
    module::Param,
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{softmax, tanh},
};

use crate::ml::encoder::LineEncoding;

/// Score given to padded positions before the softmax.
pub const MASK_FILL: f32 = -1.0e9;

/// Softmax over `dim` restricted to positions where `mask == 1`.
/// Masked positions come out as exactly 0; a row with no real
/// position comes out all-zero.
pub fn masked_softmax<B: Backend, const D: usize>(
    scores: Tensor<B, D>,
    mask:   Tensor<B, D>,
    dim:    usize,
) -> Tensor<B, D> {
    let padding = mask.clone().equal_elem(0.0);
    softmax(scores.mask_fill(padding, MASK_FILL), dim) * mask
}

fn glorot_uniform<B: Backend>(rows: usize, cols: usize, device: &B::Device) -> Param<Tensor<B, 2>> {
    let bound = (6.0 / (rows + cols) as f64).sqrt();
    Initializer::Uniform { min: -bound, max: bound }.init([rows, cols], device)
}

// ─── BilinearAttention ────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BilinearAttention<B: Backend> {
    /// W: [input_dim, context_dim]
    weight:  Param<Tensor<B, 2>>,
    /// c: [context_dim, 1]
    context: Param<Tensor<B, 2>>,
}

pub struct Attended<B: Backend> {
    /// [N, S], rows sum to 1 over real positions
    pub weights: Tensor<B, 2>,
    /// [N, input_dim]
    pub pooled:  Tensor<B, 2>,
}

impl<B: Backend> BilinearAttention<B> {
    pub fn new(input_dim: usize, context_dim: usize, device: &B::Device) -> Self {
        Self {
            weight:  glorot_uniform(input_dim, context_dim, device),
            context: glorot_uniform(context_dim, 1, device),
        }
    }

    /// `inputs` [N, S, input_dim] → raw scores [N, S]
    pub fn scores(&self, inputs: Tensor<B, 3>) -> Tensor<B, 2> {
        let [n, s, d] = inputs.dims();
        // W c, shared by every position
        let wc = self.weight.val().matmul(self.context.val()).reshape([1, 1, d]).expand([n, s, d]);
        (inputs * wc).sum_dim(2).reshape([n, s])
    }

    pub fn forward(&self, inputs: Tensor<B, 3>, mask: Tensor<B, 2>) -> Attended<B> {
        let [n, s, d] = inputs.dims();
        let weights = masked_softmax(self.scores(inputs.clone()), mask, 1);
        let pooled  = (inputs * weights.clone().reshape([n, s, 1]).expand([n, s, d]))
            .sum_dim(1)
            .reshape([n, d]);
        Attended { weights, pooled }
    }
}

// ─── Bafn ─────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Bafn<B: Backend> {
    token_attention: BilinearAttention<B>,
    fusion:          Linear<B>,
    line_attention:  BilinearAttention<B>,
}

pub struct BafnOutput<B: Backend> {
    /// [F, D]
    pub file_embedding:  Tensor<B, 2>,
    /// [F, L]
    pub line_attention:  Tensor<B, 2>,
    /// [F, L, T]
    pub token_attention: Tensor<B, 3>,
}

impl<B: Backend> Bafn<B> {
    pub fn new(gru_hidden_dim: usize, bafn_hidden_dim: usize, device: &B::Device) -> Self {
        Self {
            token_attention: BilinearAttention::new(gru_hidden_dim, bafn_hidden_dim, device),
            fusion: LinearConfig::new(2 * gru_hidden_dim, bafn_hidden_dim).init(device),
            line_attention: BilinearAttention::new(bafn_hidden_dim, bafn_hidden_dim, device),
        }
    }

    /// `encoding` covers F·L lines; `token_mask` is [F·L, T], `line_mask` [F, L].
    pub fn forward(
        &self,
        encoding:   LineEncoding<B>,
        token_mask: Tensor<B, 2>,
        line_mask:  Tensor<B, 2>,
    ) -> BafnOutput<B> {
        let [f, l]    = line_mask.dims();
        let [_, t, _] = encoding.states.dims();

        let tokens = self.token_attention.forward(encoding.states, token_mask);
        let fused  = Tensor::cat(vec![tokens.pooled, encoding.summary], 1);
        let lines  = tanh(self.fusion.forward(fused));
        let d      = lines.dims()[1];

        let file = self.line_attention.forward(lines.reshape([f, l, d]), line_mask);

        BafnOutput {
            file_embedding:  file.pooled,
            line_attention:  file.weights,
            token_attention: tokens.weights.reshape([f, l, t]),
        }
    }
}
