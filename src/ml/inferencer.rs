// ============================================================
// Layer 5 — Predictor
// ============================================================
// Runs a trained model over unseen files: file probability for
// every file, plus a line ranking for each file predicted
// defective (probability ≥ threshold).
use std::sync::Arc;

use burn::prelude::*;
use serde::Serialize;

use crate::data::batcher::{tensor_to_vec, FileBatcher};
use crate::data::dataset::FileSample;
use crate::domain::error::{LineDpError, Result};
use crate::domain::traits::TokenEmbedder;
use crate::infra::checkpoint::{CheckpointManager, BEST_MODEL};
use crate::ml::model::DefectModel;
use crate::ml::ranker::{line_scores, rank_batch, RankedLine};
use crate::ml::trainer::TrainingConfig;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct FilePrediction {
    pub file_id:      String,
    pub release:      String,
    pub probability:  f32,
    pub defective:    bool,
    /// Empty unless `defective`
    pub ranked_lines: Vec<RankedLine>,
}

pub struct Predictor<B: Backend> {
    model:      DefectModel<B>,
    batcher:    FileBatcher<B>,
    batch_size: usize,
    threshold:  f64,
    scale_by_file_probability: bool,
}

impl<B: Backend> Predictor<B> {
    pub fn new(
        model:      DefectModel<B>,
        embedder:   Arc<dyn TokenEmbedder>,
        device:     B::Device,
        batch_size: usize,
        scale_by_file_probability: bool,
    ) -> Result<Self> {
        if embedder.dim() != model.embed_dim {
            return Err(LineDpError::Configuration(format!(
                "embedder produces {}-d vectors but the model expects {}",
                embedder.dim(),
                model.embed_dim
            )));
        }
        Ok(Self {
            model,
            batcher: FileBatcher::new(device, embedder),
            batch_size: batch_size.max(1),
            threshold: DEFAULT_THRESHOLD,
            scale_by_file_probability,
        })
    }

    /// Rebuild the architecture from `config` and load the best weights.
    pub fn from_checkpoint(
        ckpt:     &CheckpointManager,
        config:   &TrainingConfig,
        embedder: Arc<dyn TokenEmbedder>,
        device:   B::Device,
    ) -> Result<Self> {
        let model = config.model.init::<B>(&device)?;
        let model = ckpt.load_model(model, BEST_MODEL, &device)?;
        Self::new(
            model,
            embedder,
            device,
            config.batch_size,
            config.ranking.scale_by_file_probability,
        )
    }

    pub fn with_threshold(mut self, threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(LineDpError::Configuration(format!(
                "threshold must be in [0, 1], got {threshold}"
            )));
        }
        self.threshold = threshold;
        Ok(self)
    }

    /// Predictions in the order of `files`.
    pub fn predict(&self, files: &[FileSample]) -> Result<Vec<FilePrediction>> {
        let mut predictions = Vec::with_capacity(files.len());

        for chunk in files.chunks(self.batch_size) {
            let batch  = self.batcher.assemble(chunk);
            let output = self.model.forward_batch(&batch)?;

            let probabilities = tensor_to_vec(output.probabilities.clone())?;
            let scores = line_scores(
                output.line_attention,
                output.probabilities,
                self.scale_by_file_probability,
            );
            let rankings = rank_batch(scores, &batch.meta)?;

            for ((sample, probability), ranking) in chunk.iter().zip(probabilities).zip(rankings) {
                let defective = f64::from(probability) >= self.threshold;
                predictions.push(FilePrediction {
                    file_id: sample.file_id.clone(),
                    release: sample.release.clone(),
                    probability,
                    defective,
                    ranked_lines: if defective { ranking } else { Vec::new() },
                });
            }
        }

        tracing::debug!("Predicted {} files", predictions.len());
        Ok(predictions)
    }
}
