// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Load + tokenize training releases  (Layer 4 - data)
//   Step 2: Load validation release, or hold
//           out a seeded fraction of training  (Layer 4 - data)
//   Step 3: Build the token embedder           (Layer 4 - data)
//   Step 4: Save config for prediction         (Layer 6 - infra)
//   Step 5: Run training loop                  (Layer 5 - ml)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::{
    dataset::{FileDataset, FileSample, SampleLimits},
    embedder::EmbedderSpec,
    loader::JsonlReleaseLoader,
    splitter::split_train_val,
    tokenizer::CodeTokenizer,
};
use crate::domain::source_file::ReleaseRole;
use crate::domain::traits::ReleaseSource;
use crate::infra::{checkpoint::CheckpointManager, metrics::{EpochRecord, MetricsLogger}};
use crate::ml::backend::{default_device, TrainingBackend};
use crate::ml::trainer::{Trainer, TrainingConfig};

pub const DEFAULT_MAX_TRAIN_LINES: usize = 1000;
pub const DEFAULT_MAX_LINE_TOKENS: usize = 50;

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything a run needs. Saved as train_config.json next to the
// weights so `predict` rebuilds the same tokenizer, embedder and model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub project:         String,
    pub train_paths:     Vec<PathBuf>,
    pub valid_path:      Option<PathBuf>,
    /// Held out from training when `valid_path` is absent
    pub valid_fraction:  f64,
    pub checkpoint_dir:  PathBuf,
    pub loss_dir:        PathBuf,
    pub tokenizer:       Option<PathBuf>,
    pub embedder:        EmbedderSpec,
    pub max_train_lines: usize,
    pub max_line_tokens: usize,
    pub training:        TrainingConfig,
}

impl TrainConfig {
    /// Directory holding this project's config and weights.
    pub fn project_dir(checkpoint_dir: &Path, project: &str) -> PathBuf {
        checkpoint_dir.join(project)
    }
}

pub struct TrainSummary {
    pub best_epoch: usize,
    pub history:    Vec<EpochRecord>,
    pub model_dir:  PathBuf,
    pub loss_log:   PathBuf,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainSummary> {
        let mut cfg = self.config.clone();
        anyhow::ensure!(!cfg.train_paths.is_empty(), "at least one --train release is required");

        // ── Step 1: Training releases ─────────────────────────────────────────
        let tokenizer = CodeTokenizer::from_path(cfg.tokenizer.as_deref())?;
        let limits    = SampleLimits::training(cfg.max_train_lines, cfg.max_line_tokens);

        let mut train = Vec::new();
        for path in &cfg.train_paths {
            train.extend(load_samples(path, ReleaseRole::Train, &tokenizer, &limits)?);
        }

        // ── Step 2: Validation ────────────────────────────────────────────────
        let (train, valid) = match &cfg.valid_path {
            Some(path) => {
                let valid = load_samples(path, ReleaseRole::Validate, &tokenizer, &limits)?;
                (train, Some(valid))
            }
            None if cfg.valid_fraction > 0.0 => {
                let (train, valid) =
                    split_train_val(train, 1.0 - cfg.valid_fraction, cfg.training.seed);
                (train, (!valid.is_empty()).then_some(valid))
            }
            None => (train, None),
        };
        tracing::info!(
            "Split: {} train, {} validation",
            train.len(),
            valid.as_ref().map_or(0, Vec::len)
        );

        // ── Step 3: Embedder ──────────────────────────────────────────────────
        let embedder = cfg.embedder.build().context("Cannot build token embedder")?;
        if embedder.dim() != cfg.training.model.embed_dim {
            tracing::info!(
                "Using embed_dim={} from the embedder (configured {})",
                embedder.dim(),
                cfg.training.model.embed_dim
            );
            cfg.training.model.embed_dim = embedder.dim();
        }

        // ── Step 4: Persist config ────────────────────────────────────────────
        let model_dir = TrainConfig::project_dir(&cfg.checkpoint_dir, &cfg.project);
        let ckpt      = CheckpointManager::new(&model_dir)?;
        ckpt.save_config(&cfg)?;
        let metrics   = MetricsLogger::new(&cfg.loss_dir, &cfg.project)?;

        // ── Step 5: Train ─────────────────────────────────────────────────────
        let device  = default_device();
        tracing::info!("Using device: {:?}", device);
        let trainer = Trainer::<TrainingBackend>::new(cfg.training.clone(), embedder, device)?;
        let report  = trainer
            .fit(
                FileDataset::new(train),
                valid.map(FileDataset::new),
                Some(&ckpt),
                Some(&metrics),
            )
            .with_context(|| format!("Training '{}' failed", cfg.project))?;

        Ok(TrainSummary {
            best_epoch: report.best_epoch,
            history:    report.history,
            model_dir,
            loss_log:   metrics.csv_path().to_path_buf(),
        })
    }
}

/// Load one release, tokenize lines that lack tokens, and truncate.
pub(crate) fn load_samples(
    path:      &Path,
    role:      ReleaseRole,
    tokenizer: &CodeTokenizer,
    limits:    &SampleLimits,
) -> Result<Vec<FileSample>> {
    let mut release = JsonlReleaseLoader::new(path, role).load_release()?;
    tokenizer.fill_missing_tokens(&mut release)?;
    let dataset = FileDataset::from_release(&release, limits)
        .with_context(|| format!("Release '{}' is not usable", release.name))?;
    Ok(dataset.into_samples())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ml::{loss::RankingConfig, model::DefectModelConfig};
    use std::fs;

    /// Four files, half defective, one `bug` line per defective file.
    pub(crate) fn write_release(dir: &Path, name: &str) -> PathBuf {
        let mut body = String::new();
        for i in 0..4 {
            let defective = i % 2 == 0;
            body.push_str(&serde_json::json!({
                "file_id": format!("src/F{i}.java"),
                "release": "",
                "label": defective,
                "lines": [
                    {"index": 1, "code": "int x = 0;", "label": false},
                    {"index": 2, "code": if defective { "x = bug(x);" } else { "x = ok(x);" }, "label": defective},
                    {"index": 3, "code": "return x;", "label": false}
                ]
            }).to_string());
            body.push('\n');
        }
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    pub(crate) fn tiny_config(dir: &Path) -> TrainConfig {
        let model = DefectModelConfig::new()
            .with_embed_dim(8)
            .with_gru_hidden_dim(4)
            .with_bafn_hidden_dim(4);
        TrainConfig {
            project:         "toy".into(),
            train_paths:     vec![write_release(dir, "toy-1.0.jsonl")],
            valid_path:      None,
            valid_fraction:  0.5,
            checkpoint_dir:  dir.join("model"),
            loss_dir:        dir.join("loss"),
            tokenizer:       None,
            embedder:        EmbedderSpec::Hashed { dim: 8, seed: 1 },
            max_train_lines: DEFAULT_MAX_TRAIN_LINES,
            max_line_tokens: DEFAULT_MAX_LINE_TOKENS,
            training:        TrainingConfig::new(model, RankingConfig::new()).with_num_epochs(2),
        }
    }

    #[test]
    fn test_train_writes_config_weights_and_loss_log() {
        let tmp     = tempfile::tempdir().unwrap();
        let summary = TrainUseCase::new(tiny_config(tmp.path())).execute().unwrap();

        assert_eq!(summary.history.len(), 2);
        assert!(summary.model_dir.join("train_config.json").is_file());
        assert!(summary.model_dir.join("best_model.mpk.gz").is_file());
        assert!(summary.loss_log.ends_with("toy-loss_record.csv"));

        let saved: TrainConfig =
            CheckpointManager::new(&summary.model_dir).unwrap().load_config().unwrap();
        assert_eq!(saved.project, "toy");
        assert_eq!(saved.training.model.embed_dim, 8);
    }

    #[test]
    fn test_embed_dim_follows_embedder() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = tiny_config(tmp.path());
        cfg.embedder = EmbedderSpec::Hashed { dim: 6, seed: 1 };
        cfg.training.num_epochs = 1;
        let summary = TrainUseCase::new(cfg).execute().unwrap();

        let saved: TrainConfig =
            CheckpointManager::new(&summary.model_dir).unwrap().load_config().unwrap();
        assert_eq!(saved.training.model.embed_dim, 6);
    }

    #[test]
    fn test_no_training_release_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = tiny_config(tmp.path());
        cfg.train_paths.clear();
        assert!(TrainUseCase::new(cfg).execute().is_err());
    }

    #[test]
    fn test_load_samples_skips_blank_code_lines() {
        let tmp  = tempfile::tempdir().unwrap();
        let path = tmp.path().join("r.jsonl");
        let body = serde_json::json!({
            "file_id": "A.java",
            "release": "r",
            "label": true,
            "lines": [
                {"index": 1, "code": "int a = 0;", "label": false},
                {"index": 2, "code": "", "label": false},
                {"index": 3, "code": "a = bug(a);", "label": true}
            ]
        });
        fs::write(&path, format!("{body}\n")).unwrap();

        let samples = load_samples(
            &path,
            ReleaseRole::Train,
            &CodeTokenizer::Lexical,
            &SampleLimits::training(DEFAULT_MAX_TRAIN_LINES, DEFAULT_MAX_LINE_TOKENS),
        )
        .unwrap();

        assert_eq!(samples.len(), 1);
        let indices: Vec<usize> = samples[0].lines.iter().map(|l| l.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(samples[0].label, Some(true));
    }
}
