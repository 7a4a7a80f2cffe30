// ============================================================
// Layer 5 — Joint Loss
// ============================================================
//   Loss = (1 − k) · L_cls + k · L_rank
//
//   L_cls   weighted binary cross-entropy on the file logits,
//           batch mean
//   L_rank  pairwise hinge  max(0, margin − (s_def − s_clean))
//           over (defective, clean) real-line pairs inside
//           ground-truth-defective files, averaged over all
//           pairs in the batch; exactly 0 when there are none
//
// The pair set is built host-side from BatchMeta as a 0/1
// weight tensor [F, L, L] (w[f, i, j] = 1 ⇔ line i defective,
// line j clean), so padded lines can never form a pair.

use burn::{prelude::*, tensor::activation::relu};
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::data::batcher::{BatchMeta, FileBatch};
use crate::data::dataset::ClassWeights;
use crate::domain::error::{LineDpError, Result as LineDpResult};
use crate::ml::model::DefectOutput;
use crate::ml::ranker::line_scores;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairSampling {
    /// Every (defective, clean) pair of a file
    All,
    /// At most `max_pairs_per_file` pairs per file, drawn uniformly
    Sampled { max_pairs_per_file: usize },
}

#[derive(Config, Debug)]
pub struct RankingConfig {
    /// Hinge margin: a defective line must outscore a clean line of
    /// the same file by at least this much to contribute zero loss
    #[config(default = 0.1)]
    pub margin: f64,
    /// Which (defective, clean) line pairs enter the ranking loss
    #[config(default = "PairSampling::All")]
    pub pair_sampling: PairSampling,
    /// Rank on attention × file probability instead of raw attention
    #[config(default = false)]
    pub scale_by_file_probability: bool,
}

impl RankingConfig {
    pub fn validate(&self) -> LineDpResult<()> {
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(LineDpError::Configuration(format!(
                "margin must be a finite value >= 0, got {}", self.margin
            )));
        }
        if let PairSampling::Sampled { max_pairs_per_file: 0 } = self.pair_sampling {
            return Err(LineDpError::Configuration("max_pairs_per_file must be > 0".into()));
        }
        Ok(())
    }
}

// ─── Pair construction ────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct RankingPairs {
    /// Row-major [F, L, L]; entry (f, i, j) is 1 when the pair
    /// (defective line i, clean line j) of file f was selected
    pub weights: Vec<f32>,
    /// Number of selected pairs (the ones in `weights`)
    pub count:   usize,
}

pub fn build_pairs(meta: &BatchMeta, sampling: PairSampling, rng: &mut ChaCha8Rng) -> RankingPairs {
    let l = meta.max_lines;
    let mut weights = vec![0.0f32; meta.file_count() * l * l];
    let mut count   = 0;

    for file in 0..meta.file_count() {
        if meta.file_labels[file] != Some(true) {
            continue;
        }
        let labels = &meta.line_labels[file];
        let defective: Vec<usize> = (0..labels.len()).filter(|&i| labels[i]).collect();
        let clean:     Vec<usize> = (0..labels.len()).filter(|&j| !labels[j]).collect();

        let mut pairs: Vec<(usize, usize)> = defective
            .iter()
            .flat_map(|&i| clean.iter().map(move |&j| (i, j)))
            .collect();

        if let PairSampling::Sampled { max_pairs_per_file } = sampling {
            if pairs.len() > max_pairs_per_file {
                let mut picked: Vec<usize> = index::sample(rng, pairs.len(), max_pairs_per_file).into_vec();
                picked.sort_unstable();
                pairs = picked.into_iter().map(|p| pairs[p]).collect();
            }
        }

        for (i, j) in pairs {
            weights[(file * l + i) * l + j] = 1.0;
            count += 1;
        }
    }
    RankingPairs { weights, count }
}

// ─── Loss terms ───────────────────────────────────────────────────────────────

/// Numerically stable BCE on logits: max(x, 0) − x·y + log(1 + e^−|x|),
/// each file weighted by `weights`, then averaged. All inputs [F, 1].
pub fn weighted_bce_with_logits<B: Backend>(
    logits:  Tensor<B, 2>,
    targets: Tensor<B, 2>,
    weights: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let per_file = logits.clone().clamp_min(0.0)
        - logits.clone() * targets
        + logits.abs().neg().exp().log1p();
    (per_file * weights).mean()
}

/// scores [F, L]; mean hinge over the pairs in `pairs`, 0 when empty.
pub fn pairwise_hinge<B: Backend>(scores: Tensor<B, 2>, pairs: &RankingPairs, margin: f64) -> Tensor<B, 1> {
    let device = scores.device();
    if pairs.count == 0 {
        return Tensor::zeros([1], &device);
    }
    let [f, l] = scores.dims();
    let mask = Tensor::<B, 1>::from_floats(pairs.weights.as_slice(), &device).reshape([f, l, l]);

    let s_def   = scores.clone().reshape([f, l, 1]).expand([f, l, l]);
    let s_clean = scores.reshape([f, 1, l]).expand([f, l, l]);
    let hinge   = relu((s_def - s_clean).neg().add_scalar(margin));

    (hinge * mask).sum().div_scalar(pairs.count as f64)
}

// ─── Joint loss ───────────────────────────────────────────────────────────────
pub struct LossBreakdown<B: Backend> {
    /// `(1 - k) · classification + k · ranking`; the tensor to call
    /// `.backward()` on
    pub total:          Tensor<B, 1>,
    /// Class-weighted BCE of the file probabilities
    pub classification: Tensor<B, 1>,
    /// Mean pairwise hinge over the selected pairs, 0 when there are none
    pub ranking:        Tensor<B, 1>,
    /// How many pairs went into `ranking` (logged per batch)
    pub pair_count:     usize,
}

#[derive(Debug, Clone)]
pub struct JointLoss {
    /// Weight of the ranking term, in [0, 1]
    pub k:       f64,
    pub ranking: RankingConfig,
}

impl JointLoss {
    pub fn new(k: f64, ranking: RankingConfig) -> LineDpResult<Self> {
        if !(0.0..=1.0).contains(&k) {
            return Err(LineDpError::Configuration(format!("k must be in [0, 1], got {k}")));
        }
        ranking.validate()?;
        Ok(Self { k, ranking })
    }

    pub fn forward<B: Backend>(
        &self,
        output:        &DefectOutput<B>,
        batch:         &FileBatch<B>,
        class_weights: ClassWeights,
        rng:           &mut ChaCha8Rng,
    ) -> LineDpResult<LossBreakdown<B>> {
        let device = output.logits.device();
        let meta   = &batch.meta;

        if meta.file_labels.iter().any(Option::is_none) {
            return Err(LineDpError::input_shape(None, "training batch contains an unlabelled file"));
        }
        let file_weights: Vec<f32> = meta
            .file_labels
            .iter()
            .map(|label| class_weights.weight(*label == Some(true)))
            .collect();
        let file_weights = Tensor::<B, 1>::from_floats(file_weights.as_slice(), &device)
            .reshape([meta.file_count(), 1]);

        let classification = weighted_bce_with_logits(
            output.logits.clone(),
            batch.file_labels.clone(),
            file_weights,
        );

        let pairs   = build_pairs(meta, self.ranking.pair_sampling, rng);
        let scores  = line_scores(
            output.line_attention.clone(),
            output.probabilities.clone(),
            self.ranking.scale_by_file_probability,
        );
        let ranking = pairwise_hinge(scores, &pairs, self.ranking.margin);

        let total = classification.clone().mul_scalar(1.0 - self.k) + ranking.clone().mul_scalar(self.k);
        Ok(LossBreakdown { total, classification, ranking, pair_count: pairs.count })
    }
}

/// Read a single-element loss tensor back to the host.
pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f64 {
    t.into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::FileBatcher;
    use crate::ml::model::DefectModelConfig;
    use crate::test_support::{sample, toy_embedder, TestBackend, TestDevice};
    use rand::SeedableRng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(0)
    }

    fn batcher() -> FileBatcher<TestBackend> {
        FileBatcher::new(TestDevice::default(), toy_embedder())
    }

    #[test]
    fn test_pairs_only_from_defective_files() {
        let batch = batcher().assemble(&[
            sample("d", Some(true),  &[(1, true), (1, false), (1, false)]),
            sample("c", Some(false), &[(1, true), (1, false)]),
        ]);
        let pairs = build_pairs(&batch.meta, PairSampling::All, &mut rng());
        assert_eq!(pairs.count, 2);
        // file 0: (0,1) and (0,2)
        assert_eq!(pairs.weights[1], 1.0);
        assert_eq!(pairs.weights[2], 1.0);
        assert_eq!(pairs.weights.iter().sum::<f32>(), 2.0);
    }

    #[test]
    fn test_sampling_caps_pairs_per_file() {
        let batch = batcher().assemble(&[sample(
            "d",
            Some(true),
            &[(1, true), (1, true), (1, false), (1, false), (1, false)],
        )]);
        let sampling = PairSampling::Sampled { max_pairs_per_file: 4 };
        let a = build_pairs(&batch.meta, sampling, &mut rng());
        let b = build_pairs(&batch.meta, sampling, &mut rng());
        assert_eq!(a.count, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hinge_matches_hand_computation() {
        let device = TestDevice::default();
        // line 0 defective, lines 1 and 2 clean
        let mut weights = vec![0.0f32; 9];
        weights[1] = 1.0;
        weights[2] = 1.0;
        let pairs  = RankingPairs { weights, count: 2 };
        let scores = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.45, 0.05]], &device);

        // max(0, 0.1 − 0.05) = 0.05, max(0, 0.1 − 0.45) = 0
        let loss = scalar(pairwise_hinge(scores, &pairs, 0.1));
        assert!((loss - 0.025).abs() < 1e-6);
    }

    #[test]
    fn test_ranking_loss_is_zero_without_pairs() {
        let model = DefectModelConfig::new()
            .with_embed_dim(2)
            .with_gru_hidden_dim(3)
            .with_bafn_hidden_dim(4)
            .init::<TestBackend>(&TestDevice::default())
            .unwrap();
        let batch = batcher().assemble(&[
            sample("c", Some(false), &[(1, false), (2, false)]),
            sample("d", Some(true),  &[(1, true), (1, true)]),
        ]);
        let output = model.forward_batch(&batch).unwrap();
        let loss   = JointLoss::new(0.3, RankingConfig::new()).unwrap();
        let parts  = loss.forward(&output, &batch, ClassWeights::UNIFORM, &mut rng()).unwrap();

        assert_eq!(parts.pair_count, 0);
        assert_eq!(scalar(parts.ranking.clone()), 0.0);
        let total = scalar(parts.total);
        let cls   = scalar(parts.classification);
        assert!((total - 0.7 * cls).abs() < 1e-6);
    }

    #[test]
    fn test_bce_uses_class_weights() {
        let device  = TestDevice::default();
        let logits  = Tensor::<TestBackend, 2>::from_floats([[0.0], [0.0]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[1.0], [0.0]], &device);
        let ones    = Tensor::<TestBackend, 2>::ones([2, 1], &device);
        let skewed  = Tensor::<TestBackend, 2>::from_floats([[3.0], [1.0]], &device);

        let plain = scalar(weighted_bce_with_logits(logits.clone(), targets.clone(), ones));
        assert!((plain - std::f64::consts::LN_2).abs() < 1e-6);
        let heavy = scalar(weighted_bce_with_logits(logits, targets, skewed));
        assert!((heavy - 2.0 * std::f64::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_unlabelled_files() {
        let model = DefectModelConfig::new()
            .with_embed_dim(2)
            .with_gru_hidden_dim(3)
            .with_bafn_hidden_dim(4)
            .init::<TestBackend>(&TestDevice::default())
            .unwrap();
        let batch  = batcher().assemble(&[sample("u", None, &[(1, false)])]);
        let output = model.forward_batch(&batch).unwrap();
        let loss   = JointLoss::new(0.2, RankingConfig::new()).unwrap();
        assert!(loss.forward(&output, &batch, ClassWeights::UNIFORM, &mut rng()).is_err());
    }

    #[test]
    fn test_k_out_of_range_is_configuration_error() {
        assert!(matches!(
            JointLoss::new(1.5, RankingConfig::new()),
            Err(LineDpError::Configuration(_))
        ));
    }
}
