use burn::{
    nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::sigmoid,
};

use crate::data::batcher::FileBatch;
use crate::domain::error::{LineDpError, Result as LineDpResult};
use crate::ml::attention::Bafn;
use crate::ml::encoder::LineEncoder;

// #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct DefectModelConfig {
    /// Width of the token vectors fed to the line encoder
    #[config(default = 768)]
    pub embed_dim:       usize,
    /// Hidden size of the GRU, i.e. the width of every token state
    #[config(default = 64)]
    pub gru_hidden_dim:  usize,
    /// Number of stacked GRU layers
    #[config(default = 1)]
    pub gru_num_layers:  usize,
    /// Width of line and file embeddings
    #[config(default = 256)]
    pub bafn_hidden_dim: usize,
    /// Dropout probability in the encoder and before the classifier.
    /// Only active while training; `model.valid()` turns it off.
    #[config(default = 0.2)]
    pub dropout:         f64,
    /// Layer-normalise the file embedding before the classifier
    #[config(default = true)]
    pub use_layer_norm:  bool,
}

impl DefectModelConfig {
    pub fn validate(&self) -> LineDpResult<()> {
        let positive = [
            ("embed_dim", self.embed_dim),
            ("gru_hidden_dim", self.gru_hidden_dim),
            ("gru_num_layers", self.gru_num_layers),
            ("bafn_hidden_dim", self.bafn_hidden_dim),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(LineDpError::Configuration(format!("{name} must be > 0")));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(LineDpError::Configuration(format!(
                "dropout must be in [0, 1), got {}", self.dropout
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> LineDpResult<DefectModel<B>> {
        self.validate()?;
        Ok(DefectModel {
            encoder: LineEncoder::new(
                self.embed_dim,
                self.gru_hidden_dim,
                self.gru_num_layers,
                self.dropout,
                device,
            ),
            bafn: Bafn::new(self.gru_hidden_dim, self.bafn_hidden_dim, device),
            classifier: FileClassifier {
                norm: self
                    .use_layer_norm
                    .then(|| LayerNormConfig::new(self.bafn_hidden_dim).init(device)),
                dropout: DropoutConfig::new(self.dropout).init(),
                output:  LinearConfig::new(self.bafn_hidden_dim, 1).init(device),
            },
            embed_dim: self.embed_dim,
        })
    }
}

// ─── File classifier head ─────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct FileClassifier<B: Backend> {
    pub norm:    Option<LayerNorm<B>>,
    pub dropout: Dropout,
    pub output:  Linear<B>,
}

impl<B: Backend> FileClassifier<B> {
    /// file_embedding: [F, D] → logits [F, 1]
    pub fn forward(&self, file_embedding: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = match &self.norm {
            Some(norm) => norm.forward(file_embedding),
            None       => file_embedding,
        };
        self.output.forward(self.dropout.forward(x))
    }
}

// ─── Full model ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct DefectModel<B: Backend> {
    pub encoder:    LineEncoder<B>,
    pub bafn:       Bafn<B>,
    pub classifier: FileClassifier<B>,
    pub embed_dim:  usize,
}

#[derive(Debug, Clone)]
pub struct DefectOutput<B: Backend> {
    /// [F, 1]
    pub logits:          Tensor<B, 2>,
    /// sigmoid(logits), [F, 1]
    pub probabilities:   Tensor<B, 2>,
    /// [F, L], sums to 1 over each file's real lines, 0 on padding
    pub line_attention:  Tensor<B, 2>,
    /// [F, L, T]
    pub token_attention: Tensor<B, 3>,
}

impl<B: Backend> DefectModel<B> {
    /// embeddings [F, L, T, E], token_mask [F, L, T], line_mask [F, L]
    pub fn forward(
        &self,
        embeddings: Tensor<B, 4>,
        token_mask: Tensor<B, 3>,
        line_mask:  Tensor<B, 2>,
    ) -> DefectOutput<B> {
        let [f, l, t, e] = embeddings.dims();

        // Every line of every file is an independent sequence for the GRU
        let token_mask = token_mask.reshape([f * l, t]);
        let encoding   = self.encoder.forward(embeddings.reshape([f * l, t, e]), token_mask.clone());
        let fused      = self.bafn.forward(encoding, token_mask, line_mask);

        let logits = self.classifier.forward(fused.file_embedding);
        DefectOutput {
            probabilities:   sigmoid(logits.clone()),
            logits,
            line_attention:  fused.line_attention,
            token_attention: fused.token_attention,
        }
    }

    /// Shape-checked forward pass over a batch.
    pub fn forward_batch(&self, batch: &FileBatch<B>) -> LineDpResult<DefectOutput<B>> {
        batch.check_shape(self.embed_dim)?;
        Ok(self.forward(
            batch.embeddings.clone(),
            batch.token_mask.clone(),
            batch.line_mask.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::{tensor_to_vec, FileBatcher};
    use crate::data::embedder::HashedEmbedder;
    use crate::test_support::{sample, TestBackend};
    use std::sync::Arc;

    fn small_config() -> DefectModelConfig {
        DefectModelConfig::new()
            .with_embed_dim(6)
            .with_gru_hidden_dim(5)
            .with_bafn_hidden_dim(4)
            .with_dropout(0.0)
    }

    fn batcher() -> FileBatcher<TestBackend> {
        FileBatcher::new(Default::default(), Arc::new(HashedEmbedder::new(6, 3).unwrap()))
    }

    #[test]
    fn test_defaults_match_reference_hyperparameters() {
        let cfg = DefectModelConfig::new();
        assert_eq!(cfg.embed_dim, 768);
        assert_eq!(cfg.gru_hidden_dim, 64);
        assert_eq!(cfg.gru_num_layers, 1);
        assert_eq!(cfg.bafn_hidden_dim, 256);
        assert!((cfg.dropout - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_zero_layers() {
        let cfg = small_config().with_gru_num_layers(0);
        let err = cfg.init::<TestBackend>(&Default::default()).unwrap_err();
        assert!(matches!(err, LineDpError::Configuration(_)));
    }

    #[test]
    fn test_rejects_dropout_of_one() {
        assert!(small_config().with_dropout(1.0).validate().is_err());
    }

    #[test]
    fn test_line_attention_sums_to_one_over_real_lines() {
        let model = small_config().with_gru_num_layers(2).init::<TestBackend>(&Default::default()).unwrap();
        let batch = batcher().assemble(&[
            sample("a", None, &[(3, false), (1, false), (2, false), (4, false)]),
            sample("b", None, &[(2, false), (5, false)]),
            sample("c", None, &[(1, false)]),
        ]);
        let out = model.forward_batch(&batch).unwrap();
        let att = tensor_to_vec(out.line_attention).unwrap();

        for (file, real) in [(0usize, 4usize), (1, 2), (2, 1)] {
            let row = &att[file * 4..(file + 1) * 4];
            let sum: f32 = row[..real].iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "file {file} sums to {sum}");
            assert!(row[real..].iter().all(|&w| w == 0.0));
        }
        // single real line gets everything
        assert!((att[8] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_token_attention_respects_token_mask() {
        let model = small_config().init::<TestBackend>(&Default::default()).unwrap();
        let batch = batcher().assemble(&[sample("a", None, &[(1, false), (3, false)])]);
        let att   = tensor_to_vec(model.forward_batch(&batch).unwrap().token_attention).unwrap();
        // line 0: one real token of three
        assert!((att[0] - 1.0).abs() < 1e-6);
        assert_eq!(&att[1..3], &[0.0, 0.0]);
        assert!((att[3..6].iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_probabilities_in_open_unit_interval() {
        let model = small_config().init::<TestBackend>(&Default::default()).unwrap();
        let batch = batcher().assemble(&[sample("a", None, &[(2, false)]), sample("b", None, &[(1, false)])]);
        let out   = model.forward_batch(&batch).unwrap();
        assert_eq!(out.probabilities.dims(), [2, 1]);
        assert!(tensor_to_vec(out.probabilities).unwrap().iter().all(|&p| p > 0.0 && p < 1.0));
    }

    #[test]
    fn test_forward_is_deterministic() {
        let model = small_config().init::<TestBackend>(&Default::default()).unwrap();
        let batch = batcher().assemble(&[
            sample("a", None, &[(2, false), (3, false)]),
            sample("b", None, &[(1, false)]),
        ]);
        let first  = model.forward_batch(&batch).unwrap();
        let second = model.forward_batch(&batch).unwrap();
        assert_eq!(
            tensor_to_vec(first.probabilities).unwrap(),
            tensor_to_vec(second.probabilities).unwrap()
        );
        assert_eq!(
            tensor_to_vec(first.line_attention).unwrap(),
            tensor_to_vec(second.line_attention).unwrap()
        );
    }

    #[test]
    fn test_padding_does_not_change_a_files_output() {
        let model = small_config().init::<TestBackend>(&Default::default()).unwrap();
        let a     = sample("a", None, &[(2, false), (1, false)]);
        let alone = model.forward_batch(&batcher().assemble(&[a.clone()])).unwrap();
        let mixed = model
            .forward_batch(&batcher().assemble(&[a, sample("big", None, &[(5, false); 4])]))
            .unwrap();

        let p_alone = tensor_to_vec(alone.probabilities).unwrap();
        let p_mixed = tensor_to_vec(mixed.probabilities).unwrap();
        assert!((p_alone[0] - p_mixed[0]).abs() < 1e-5);

        let w_alone = tensor_to_vec(alone.line_attention).unwrap();
        let w_mixed = tensor_to_vec(mixed.line_attention).unwrap();
        assert!((w_alone[0] - w_mixed[0]).abs() < 1e-5);
        assert!((w_alone[1] - w_mixed[1]).abs() < 1e-5);
        assert_eq!(&w_mixed[2..4], &[0.0, 0.0]);
    }

    #[test]
    fn test_forward_batch_rejects_wrong_width() {
        let model = small_config().with_embed_dim(8).init::<TestBackend>(&Default::default()).unwrap();
        let batch = batcher().assemble(&[sample("a", None, &[(1, false)])]);
        assert!(matches!(model.forward_batch(&batch), Err(LineDpError::InputShape { .. })));
    }
}
