// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Full train + validation loop using Burn's DataLoader and Adam.
//
//   Idle → LoadBatch → Forward → ComputeLoss → Backward → Update
//        → (next batch until epoch end) → Validate → Checkpoint
//        → (next epoch until num_epochs) → Done
//
//   - Training runs on B (an AutodiffBackend)
//   - model.valid() returns the model on B::InnerBackend, so
//     validation uses an inner-backend batcher and has dropout off
//   - A non-finite loss or gradient norm stops training with
//     NumericInstability naming the epoch and batch (1-based)
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use std::sync::Arc;

use burn::{
    data::dataloader::DataLoaderBuilder,
    grad_clipping::GradientClippingConfig,
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::data::batcher::{tensor_to_vec, FileBatch, FileBatcher};
use crate::data::dataset::{ClassWeights, FileDataset};
use crate::domain::error::{LineDpError, Result as LineDpResult};
use crate::domain::traits::TokenEmbedder;
use crate::infra::checkpoint::{epoch_model_name, CheckpointManager, BEST_MODEL, BEST_OPTIMIZER};
use crate::infra::evaluation::roc_auc;
use crate::infra::metrics::{EpochRecord, MetricsLogger};
use crate::ml::loss::{scalar, JointLoss, RankingConfig};
use crate::ml::model::{DefectModel, DefectModelConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointPolicy {
    /// model_epoch_<n> after every epoch; best_model as for BestValidation
    EveryEpoch,
    /// best_model = highest validation AUC, ties to the later epoch
    BestValidation,
    /// best_model = weights after the last epoch
    FinalEpoch,
}

/// Within- or cross-project prediction; picks the default `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scenario {
    WithinProject,
    CrossProject,
}

impl Scenario {
    pub fn default_k(self) -> f64 {
        match self {
            Scenario::WithinProject => 0.2,
            Scenario::CrossProject  => 0.3,
        }
    }
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model:   DefectModelConfig,
    pub ranking: RankingConfig,
    #[config(default = 16)]
    pub batch_size: usize,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 1e-3)]
    pub lr: f64,
    /// Weight of the ranking loss: (1 − k)·cls + k·rank
    #[config(default = 0.2)]
    pub k: f64,
    #[config(default = 5.0)]
    pub max_grad_norm: f64,
    #[config(default = 0.0)]
    pub weight_decay: f64,
    #[config(default = 0)]
    pub seed: u64,
    /// Balanced per-class weights on the classification loss
    #[config(default = true)]
    pub class_weighting: bool,
    #[config(default = "CheckpointPolicy::BestValidation")]
    pub checkpoint_policy: CheckpointPolicy,
}

impl TrainingConfig {
    pub fn for_scenario(self, scenario: Scenario) -> Self {
        self.with_k(scenario.default_k())
    }

    pub fn validate(&self) -> LineDpResult<()> {
        self.model.validate()?;
        self.ranking.validate()?;
        if self.batch_size == 0 || self.num_epochs == 0 {
            return Err(LineDpError::Configuration(
                "batch_size and num_epochs must be > 0".into(),
            ));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(LineDpError::Configuration(format!("lr must be > 0, got {}", self.lr)));
        }
        if !(0.0..=1.0).contains(&self.k) {
            return Err(LineDpError::Configuration(format!("k must be in [0, 1], got {}", self.k)));
        }
        if self.max_grad_norm <= 0.0 || self.weight_decay < 0.0 {
            return Err(LineDpError::Configuration(
                "max_grad_norm must be > 0 and weight_decay >= 0".into(),
            ));
        }
        Ok(())
    }
}

pub struct TrainingReport<B: AutodiffBackend> {
    /// The model selected by the checkpoint policy
    pub model:      DefectModel<B>,
    pub best_epoch: usize,
    pub history:    Vec<EpochRecord>,
}

// ─── Gradient norm visitor ────────────────────────────────────────────────────
struct GradNorm<'a, B: AutodiffBackend> {
    grads:  &'a B::Gradients,
    sum_sq: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        if let Some(grad) = tensor.grad(self.grads) {
            self.sum_sq += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

// ─── Trainer ──────────────────────────────────────────────────────────────────
pub struct Trainer<B: AutodiffBackend> {
    config:   TrainingConfig,
    embedder: Arc<dyn TokenEmbedder>,
    device:   B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainingConfig, embedder: Arc<dyn TokenEmbedder>, device: B::Device) -> LineDpResult<Self> {
        config.validate()?;
        if embedder.dim() != config.model.embed_dim {
            return Err(LineDpError::Configuration(format!(
                "embedder produces {}-d vectors but embed_dim is {}",
                embedder.dim(),
                config.model.embed_dim
            )));
        }
        Ok(Self { config, embedder, device })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn fit(
        &self,
        train:       FileDataset,
        valid:       Option<FileDataset>,
        checkpoints: Option<&CheckpointManager>,
        metrics:     Option<&MetricsLogger>,
    ) -> LineDpResult<TrainingReport<B>> {
        let cfg = &self.config;
        require_labelled(&train, "training")?;
        if let Some(v) = &valid {
            require_labelled(v, "validation")?;
        }

        B::seed(cfg.seed);
        let mut model: DefectModel<B> = cfg.model.init(&self.device)?;
        let loss_fn = JointLoss::new(cfg.k, cfg.ranking.clone())?;

        let class_weights = if cfg.class_weighting { train.class_weights() } else { ClassWeights::UNIFORM };
        tracing::info!(
            "Training on {} files (weights defect={:.3}, clean={:.3}), k={}",
            train.samples().len(), class_weights.defect, class_weights.clean, cfg.k,
        );

        // ── Adam optimiser ────────────────────────────────────────────────────
        let mut optim = AdamConfig::new()
            .with_epsilon(1e-8)
            .with_grad_clipping(Some(GradientClippingConfig::Norm(cfg.max_grad_norm as f32)))
            .with_weight_decay(
                (cfg.weight_decay > 0.0).then(|| WeightDecayConfig::new(cfg.weight_decay as f32)),
            )
            .init::<B, DefectModel<B>>();

        // ── Data loaders ──────────────────────────────────────────────────────
        let train_loader = DataLoaderBuilder::new(FileBatcher::<B>::new(self.device.clone(), self.embedder.clone()))
            .batch_size(cfg.batch_size)
            .shuffle(cfg.seed)
            .num_workers(1)
            .build(train);

        let valid_loader = valid.map(|v| {
            DataLoaderBuilder::new(FileBatcher::<B::InnerBackend>::new(self.device.clone(), self.embedder.clone()))
                .batch_size(cfg.batch_size)
                .num_workers(1)
                .build(v)
        });
        if valid_loader.is_none() {
            tracing::warn!("No validation set: the latest epoch is always kept");
        }

        let mut pair_rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        let mut history  = Vec::with_capacity(cfg.num_epochs);
        let mut best: Option<(usize, Option<f64>, DefectModel<B>)> = None;

        // ── Epoch loop ────────────────────────────────────────────────────────
        for epoch in 1..=cfg.num_epochs {
            let mut sums    = [0.0f64; 3];
            let mut batches = 0usize;

            for (i, batch) in train_loader.iter().enumerate() {
                let batch_no = i + 1;
                let output   = model.forward_batch(&batch)?;
                let parts    = loss_fn.forward(&output, &batch, class_weights, &mut pair_rng)?;

                let total = scalar(parts.total.clone());
                if !total.is_finite() {
                    return Err(LineDpError::NumericInstability {
                        epoch, batch: batch_no, quantity: "loss", value: total,
                    });
                }
                sums[0] += total;
                sums[1] += scalar(parts.classification);
                sums[2] += scalar(parts.ranking);
                batches += 1;

                let grads = parts.total.backward();
                let mut norm = GradNorm::<B> { grads: &grads, sum_sq: 0.0 };
                model.visit(&mut norm);
                let grad_norm = norm.sum_sq.sqrt();
                if !grad_norm.is_finite() {
                    return Err(LineDpError::NumericInstability {
                        epoch, batch: batch_no, quantity: "gradient norm", value: grad_norm,
                    });
                }
                tracing::debug!(
                    "epoch {epoch} batch {batch_no}: loss={total:.4} pairs={} grad_norm={grad_norm:.4}",
                    parts.pair_count,
                );

                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(cfg.lr, model, grads);
            }

            let mean = |s: f64| if batches > 0 { s / batches as f64 } else { f64::NAN };
            let (valid_loss, valid_auc) = match &valid_loader {
                Some(loader) => {
                    let (loss, auc) = self.validate_epoch(epoch, &model.valid(), loader.iter(), &loss_fn)?;
                    (Some(loss), auc)
                }
                None => (None, None),
            };
            if valid_loader.is_some() && valid_auc.is_none() {
                tracing::warn!("Validation set holds a single class; AUC undefined at epoch {epoch}");
            }

            let record = EpochRecord {
                epoch,
                train_loss:      mean(sums[0]),
                train_cls_loss:  mean(sums[1]),
                train_rank_loss: mean(sums[2]),
                k:               cfg.k,
                valid_loss,
                valid_auc,
            };
            tracing::info!(
                "Epoch {:>3}/{} | train_loss={:.4} (cls={:.4}, rank={:.4}) | valid_loss={} | valid_auc={}",
                epoch, cfg.num_epochs, record.train_loss, record.train_cls_loss,
                record.train_rank_loss, fmt_opt(valid_loss), fmt_opt(valid_auc),
            );

            // ── Checkpoint ────────────────────────────────────────────────────
            if let (Some(ckpt), CheckpointPolicy::EveryEpoch) = (checkpoints, cfg.checkpoint_policy) {
                ckpt.save_model(&model, &epoch_model_name(epoch))?;
            }
            let improved = match cfg.checkpoint_policy {
                CheckpointPolicy::FinalEpoch => epoch == cfg.num_epochs,
                _ => record.is_improvement(best.as_ref().and_then(|(_, auc, _)| *auc)),
            };
            if improved {
                if let Some(ckpt) = checkpoints {
                    ckpt.save_model(&model, BEST_MODEL)?;
                    ckpt.save_optimizer::<B, _>(optim.to_record(), BEST_OPTIMIZER)?;
                }
                tracing::info!("Epoch {epoch} selected as best model");
                best = Some((epoch, valid_auc, model.clone()));
            }

            history.push(record);
            if let Some(logger) = metrics {
                logger.write(&history)?;
            }
        }

        let (best_epoch, _, model) = best.ok_or_else(|| {
            LineDpError::Configuration("training finished without selecting a model".into())
        })?;
        tracing::info!("Training complete! Best epoch: {best_epoch}");
        Ok(TrainingReport { model, best_epoch, history })
    }

    /// Unweighted mean loss and file-level AUC on the validation set.
    /// A non-finite batch loss aborts the run like a training loss would.
    fn validate_epoch(
        &self,
        epoch:   usize,
        model:   &DefectModel<B::InnerBackend>,
        batches: impl Iterator<Item = FileBatch<B::InnerBackend>>,
        loss_fn: &JointLoss,
    ) -> LineDpResult<(f64, Option<f64>)> {
        // fixed seed so every epoch sees the same pairs
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut loss_sum = 0.0;
        let mut count    = 0usize;
        let mut scores   = Vec::new();
        let mut labels   = Vec::new();

        for (i, batch) in batches.enumerate() {
            let output = model.forward_batch(&batch)?;
            let parts  = loss_fn.forward(&output, &batch, ClassWeights::UNIFORM, &mut rng)?;
            let total  = scalar(parts.total);
            if !total.is_finite() {
                return Err(LineDpError::NumericInstability {
                    epoch, batch: i + 1, quantity: "validation loss", value: total,
                });
            }
            loss_sum += total;
            count    += 1;

            scores.extend(tensor_to_vec(output.probabilities)?.into_iter().map(f64::from));
            labels.extend(batch.meta.file_labels.iter().map(|l| *l == Some(true)));
        }
        let loss = if count > 0 { loss_sum / count as f64 } else { f64::NAN };
        Ok((loss, roc_auc(&scores, &labels)))
    }
}

fn require_labelled(dataset: &FileDataset, role: &str) -> LineDpResult<()> {
    if dataset.samples().is_empty() {
        return Err(LineDpError::input_shape(None, format!("{role} set is empty")));
    }
    match dataset.samples().iter().find(|s| s.label.is_none()) {
        Some(s) => Err(LineDpError::input_shape(
            Some(&s.file_id),
            format!("{role} files need a file label"),
        )),
        None => Ok(()),
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "-".into())
}
