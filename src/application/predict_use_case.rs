// ============================================================
// Layer 2 — PredictUseCase
// ============================================================
// Loads a trained project and predicts a test release:
//
//   Step 1: Read train_config.json             (Layer 6 - infra)
//   Step 2: Load + tokenize the test release   (Layer 4 - data)
//           (never line-truncated: every line gets ranked)
//   Step 3: Rebuild embedder, model, weights   (Layer 5 - ml)
//   Step 4: Predict, rank, evaluate            (Layer 5/6)
//   Step 5: Write predictions as JSON lines    (Layer 6 - infra)

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::application::train_use_case::{load_samples, TrainConfig};
use crate::data::{dataset::SampleLimits, tokenizer::CodeTokenizer};
use crate::domain::source_file::ReleaseRole;
use crate::infra::{
    checkpoint::{write_atomic, CheckpointManager},
    evaluation::{evaluate, EvaluationSummary, FileOutcome},
};
use crate::ml::backend::{default_device, InferenceBackend};
use crate::ml::inferencer::{FilePrediction, Predictor, DEFAULT_THRESHOLD};

pub struct PredictRequest {
    pub project:        String,
    pub test_path:      PathBuf,
    pub checkpoint_dir: PathBuf,
    pub output:         Option<PathBuf>,
    pub threshold:      Option<f64>,
}

pub struct PredictionReport {
    pub predictions: Vec<FilePrediction>,
    pub evaluation:  EvaluationSummary,
}

pub struct PredictUseCase {
    request: PredictRequest,
}

impl PredictUseCase {
    pub fn new(request: PredictRequest) -> Self {
        Self { request }
    }

    pub fn execute(&self) -> Result<PredictionReport> {
        let req = &self.request;

        // ── Step 1: Config ────────────────────────────────────────────────────
        let ckpt = CheckpointManager::new(TrainConfig::project_dir(&req.checkpoint_dir, &req.project))?;
        let cfg: TrainConfig = ckpt.load_config().with_context(|| {
            format!("No trained model for '{}'. Run 'train' before 'predict'.", req.project)
        })?;

        // ── Step 2: Test release ──────────────────────────────────────────────
        let tokenizer = CodeTokenizer::from_path(cfg.tokenizer.as_deref())?;
        let samples   = load_samples(
            &req.test_path,
            ReleaseRole::Test,
            &tokenizer,
            &SampleLimits::inference(cfg.max_line_tokens),
        )?;

        // ── Step 3: Model ─────────────────────────────────────────────────────
        let embedder  = cfg.embedder.build().context("Cannot rebuild token embedder")?;
        let predictor = Predictor::<InferenceBackend>::from_checkpoint(
            &ckpt,
            &cfg.training,
            embedder,
            default_device(),
        )?
        .with_threshold(req.threshold.unwrap_or(DEFAULT_THRESHOLD))?;

        // ── Step 4: Predict + evaluate ────────────────────────────────────────
        let predictions = predictor.predict(&samples)?;
        let outcomes: Vec<FileOutcome> = samples
            .iter()
            .zip(&predictions)
            .map(|(sample, pred)| FileOutcome {
                probability:   f64::from(pred.probability),
                label:         sample.label,
                ranked_labels: pred
                    .ranked_lines
                    .iter()
                    .map(|r| sample.lines[r.position].label)
                    .collect(),
            })
            .collect();
        let evaluation = evaluate(&outcomes);

        tracing::info!(
            "Predicted {} files, {} flagged defective",
            predictions.len(),
            predictions.iter().filter(|p| p.defective).count()
        );

        // ── Step 5: Output ────────────────────────────────────────────────────
        if let Some(path) = &req.output {
            let mut body = String::new();
            for p in &predictions {
                body.push_str(&serde_json::to_string(p)?);
                body.push('\n');
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Cannot create '{}'", parent.display()))?;
            }
            write_atomic(path, body.as_bytes())?;
            tracing::info!("Wrote predictions to '{}'", path.display());
        }

        Ok(PredictionReport { predictions, evaluation })
    }
}
