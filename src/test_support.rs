//! Fixtures shared by the unit tests.

use std::sync::Arc;

use crate::data::dataset::{FileSample, LineSample};
use crate::domain::traits::TokenEmbedder;

pub type TestBackend = burn::backend::NdArray;
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
pub type TestDevice = burn::backend::ndarray::NdArrayDevice;

/// File `id` whose lines have the given (token count, defective) shape.
/// Tokens are named `tok0`, `tok1`, ...
pub fn sample(id: &str, label: Option<bool>, lines: &[(usize, bool)]) -> FileSample {
    FileSample {
        file_id: id.to_string(),
        release: "r".to_string(),
        label,
        lines: lines
            .iter()
            .enumerate()
            .map(|(i, &(n, defective))| LineSample {
                index:  i + 1,
                tokens: (0..n).map(|k| format!("tok{k}")).collect(),
                label:  defective,
            })
            .collect(),
    }
}

/// File whose lines are given as explicit token lists.
pub fn sample_with_tokens(id: &str, label: Option<bool>, lines: Vec<(Vec<&str>, bool)>) -> FileSample {
    FileSample {
        file_id: id.to_string(),
        release: "r".to_string(),
        label,
        lines: lines
            .into_iter()
            .enumerate()
            .map(|(i, (tokens, defective))| LineSample {
                index:  i + 1,
                tokens: tokens.into_iter().map(str::to_string).collect(),
                label:  defective,
            })
            .collect(),
    }
}

/// Two-dimensional one-hot space: `bug` and `ok` are orthogonal,
/// anything else is the zero vector.
pub struct ToyEmbedder;

impl TokenEmbedder for ToyEmbedder {
    fn dim(&self) -> usize {
        2
    }

    fn embed_into(&self, token: &str, out: &mut [f32]) {
        out.fill(0.0);
        match token {
            "bug" => out[0] = 1.0,
            "ok"  => out[1] = 1.0,
            _     => {}
        }
    }
}

pub fn toy_embedder() -> Arc<dyn TokenEmbedder> {
    Arc::new(ToyEmbedder)
}
