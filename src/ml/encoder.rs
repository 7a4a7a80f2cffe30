// ============================================================
// Layer 5 — Line Encoder
// ============================================================
// Stacked unidirectional GRU over the token vectors of one line.
//
//   tokens     [N, T, E]   N = files × padded lines
//   token_mask [N, T]      right-padded, 1 = real token
//     ──► states  [N, T, H]  hidden state after every token
//     ──► summary [N, H]     hidden state after the LAST REAL token
//
// Padding sits to the right of every real token, so a left-to-
// right GRU never mixes padding into the states of real tokens.
// The summary is picked with a one-hot "last real token" mask
// instead of taking position T-1, which would be padding for
// every line shorter than the batch maximum.

use burn::{
    nn::{
        gru::{Gru, GruConfig},
        Dropout, DropoutConfig,
    },
    prelude::*,
};

#[derive(Module, Debug)]
pub struct LineEncoder<B: Backend> {
    layers:  Vec<Gru<B>>,
    dropout: Dropout,
}

pub struct LineEncoding<B: Backend> {
    pub states:  Tensor<B, 3>,
    pub summary: Tensor<B, 2>,
}

impl<B: Backend> LineEncoder<B> {
    pub fn new(
        embed_dim:  usize,
        hidden_dim: usize,
        num_layers: usize,
        dropout:    f64,
        device:     &B::Device,
    ) -> Self {
        let layers = (0..num_layers)
            .map(|i| {
                let d_input = if i == 0 { embed_dim } else { hidden_dim };
                GruConfig::new(d_input, hidden_dim, true).init(device)
            })
            .collect();
        Self { layers, dropout: DropoutConfig::new(dropout).init() }
    }

    pub fn forward(&self, tokens: Tensor<B, 3>, token_mask: Tensor<B, 2>) -> LineEncoding<B> {
        let mut x = tokens;
        for gru in &self.layers {
            x = gru.forward(x, None);
        }
        let states = self.dropout.forward(x);

        let [n, t, h] = states.dims();
        let last    = last_real_token(token_mask).reshape([n, t, 1]).expand([n, t, h]);
        let summary = (states.clone() * last).sum_dim(1).reshape([n, h]);

        LineEncoding { states, summary }
    }
}

/// One-hot over the last real token of each row of a right-padded
/// mask: `mask[t] - mask[t + 1]`. Rows without real tokens are all zero.
pub fn last_real_token<B: Backend>(mask: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, t] = mask.dims();
    if t == 1 {
        return mask;
    }
    let next = Tensor::cat(
        vec![
            mask.clone().slice([0..n, 1..t]),
            Tensor::zeros([n, 1], &mask.device()),
        ],
        1,
    );
    mask - next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::tensor_to_vec;
    use crate::test_support::TestBackend;

    #[test]
    fn test_last_real_token_selector() {
        let device = Default::default();
        let mask = Tensor::<TestBackend, 2>::from_floats(
            [[1.0, 1.0, 1.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]],
            &device,
        );
        assert_eq!(
            tensor_to_vec(last_real_token(mask)).unwrap(),
            vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_summary_ignores_padding() {
        let device  = Default::default();
        let encoder = LineEncoder::<TestBackend>::new(3, 5, 2, 0.0, &device);

        let short  = Tensor::<TestBackend, 3>::random([1, 2, 3], burn::tensor::Distribution::Default, &device);
        let noise  = Tensor::<TestBackend, 3>::random([1, 2, 3], burn::tensor::Distribution::Default, &device);
        let padded = Tensor::cat(vec![short.clone(), noise], 1);

        let alone = encoder.forward(short, Tensor::ones([1, 2], &device));
        let mask  = Tensor::from_floats([[1.0, 1.0, 0.0, 0.0]], &device);
        let mixed = encoder.forward(padded, mask);

        let a = tensor_to_vec(alone.summary).unwrap();
        let b = tensor_to_vec(mixed.summary).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
        assert_eq!(mixed.states.dims(), [1, 4, 5]);
    }
}
