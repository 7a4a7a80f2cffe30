// ============================================================
// Layer 5 — Line Ranker
// ============================================================
// Turns line attention into per-line scores and orders the real
// lines of a file from most to least suspicious.
//
//   score(line) = line_attention            (default)
//               = line_attention × P(file)  (scale_by_file_probability)
//
// Scores are recomputed on every forward pass and never stored.

use std::cmp::Ordering;

use burn::prelude::*;
use serde::Serialize;

use crate::data::batcher::{tensor_to_vec, BatchMeta};
use crate::domain::error::{LineDpError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedLine {
    /// Source line number
    pub line:     usize,
    /// Position of the line within the file (0-based)
    pub position: usize,
    pub score:    f32,
}

/// line_attention [F, L], probabilities [F, 1] → scores [F, L]
pub fn line_scores<B: Backend>(
    line_attention: Tensor<B, 2>,
    probabilities:  Tensor<B, 2>,
    scale_by_file_probability: bool,
) -> Tensor<B, 2> {
    if !scale_by_file_probability {
        return line_attention;
    }
    let dims = line_attention.dims();
    line_attention * probabilities.expand(dims)
}

/// Stable descending order over the real lines; ties keep file order.
pub fn rank_lines(scores: &[f32], line_numbers: &[usize]) -> Vec<RankedLine> {
    let mut ranked: Vec<RankedLine> = line_numbers
        .iter()
        .zip(scores)
        .enumerate()
        .map(|(position, (&line, &score))| RankedLine { line, position, score })
        .collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    ranked
}

/// Rank every file of a batch. Padding columns of `scores` are ignored.
pub fn rank_batch<B: Backend>(scores: Tensor<B, 2>, meta: &BatchMeta) -> Result<Vec<Vec<RankedLine>>> {
    let [f, l] = scores.dims();
    if f != meta.file_count() {
        return Err(LineDpError::input_shape(
            None,
            format!("{f} score rows for {} files", meta.file_count()),
        ));
    }
    let host = tensor_to_vec(scores)?;
    Ok((0..f)
        .map(|i| {
            let real = meta.line_count(i).min(l);
            rank_lines(&host[i * l..i * l + real], &meta.line_numbers[i][..real])
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::FileBatcher;
    use crate::test_support::{sample, toy_embedder, TestBackend, TestDevice};

    #[test]
    fn test_rank_orders_by_descending_score() {
        let ranked = rank_lines(&[0.1, 0.6, 0.3], &[10, 11, 12]);
        let lines: Vec<usize> = ranked.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![11, 12, 10]);
        assert_eq!(ranked[0].position, 1);
    }

    #[test]
    fn test_ties_keep_original_order() {
        let ranked = rank_lines(&[0.25, 0.5, 0.25, 0.25], &[1, 2, 3, 4]);
        let lines: Vec<usize> = ranked.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_rank_batch_is_permutation_of_real_lines() {
        let device = TestDevice::default();
        let batch = FileBatcher::<TestBackend>::new(device.clone(), toy_embedder()).assemble(&[
            sample("a", None, &[(1, false), (1, false), (1, false)]),
            sample("b", None, &[(1, false)]),
        ]);
        // padded column of file b carries a large value that must not surface
        let scores = Tensor::<TestBackend, 2>::from_floats([[0.2, 0.5, 0.3], [1.0, 9.0, 9.0]], &device);

        let ranked = rank_batch(scores, &batch.meta).unwrap();
        let mut a: Vec<usize> = ranked[0].iter().map(|r| r.line).collect();
        assert_eq!(a, vec![2, 3, 1]);
        a.sort_unstable();
        assert_eq!(a, vec![1, 2, 3]);

        assert_eq!(ranked[1].len(), 1);
        assert_eq!(ranked[1][0].line, 1);
        assert_eq!(ranked[1][0].score, 1.0);
    }

    #[test]
    fn test_scaling_multiplies_by_file_probability() {
        let device = TestDevice::default();
        let att    = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5], [1.0, 0.0]], &device);
        let prob   = Tensor::<TestBackend, 2>::from_floats([[0.8], [0.25]], &device);

        let plain  = tensor_to_vec(line_scores(att.clone(), prob.clone(), false)).unwrap();
        assert_eq!(plain, vec![0.5, 0.5, 1.0, 0.0]);

        let scaled = tensor_to_vec(line_scores(att, prob, true)).unwrap();
        let want   = [0.4, 0.4, 0.25, 0.0];
        for (got, want) in scaled.iter().zip(want) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rank_batch_rejects_row_mismatch() {
        let device = TestDevice::default();
        let batch  = FileBatcher::<TestBackend>::new(device.clone(), toy_embedder())
            .assemble(&[sample("a", None, &[(1, false)])]);
        let scores = Tensor::<TestBackend, 2>::zeros([2, 1], &device);
        assert!(rank_batch(scores, &batch.meta).is_err());
    }
}
