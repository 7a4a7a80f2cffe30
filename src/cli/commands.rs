// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `predict`, and all
// their configurable flags. The From impls at the bottom are
// the boundary to Layer 2: the application layer never sees
// clap types.

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::application::predict_use_case::PredictRequest;
use crate::application::train_use_case::{
    TrainConfig, DEFAULT_MAX_LINE_TOKENS, DEFAULT_MAX_TRAIN_LINES,
};
use crate::data::embedder::EmbedderSpec;
use crate::ml::loss::{PairSampling, RankingConfig};
use crate::ml::model::DefectModelConfig;
use crate::ml::trainer::{CheckpointPolicy, Scenario, TrainingConfig};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a defect model on one or more labelled releases
    Train(TrainArgs),

    /// Predict defective files and rank their lines
    Predict(PredictArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ScenarioArg {
    /// Within-project: train and test on releases of one project (k = 0.2)
    Wpdp,
    /// Cross-project: train on other projects (k = 0.3)
    Cpdp,
}

impl From<ScenarioArg> for Scenario {
    fn from(s: ScenarioArg) -> Self {
        match s {
            ScenarioArg::Wpdp => Scenario::WithinProject,
            ScenarioArg::Cpdp => Scenario::CrossProject,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum PolicyArg {
    EveryEpoch,
    BestValidation,
    FinalEpoch,
}

impl From<PolicyArg> for CheckpointPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::EveryEpoch     => CheckpointPolicy::EveryEpoch,
            PolicyArg::BestValidation => CheckpointPolicy::BestValidation,
            PolicyArg::FinalEpoch     => CheckpointPolicy::FinalEpoch,
        }
    }
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Project name; names the checkpoint folder and loss log
    #[arg(long)]
    pub project: String,

    /// Training release (JSON lines); repeat for several releases
    #[arg(long = "train", required = true)]
    pub train: Vec<PathBuf>,

    /// Validation release; when absent a fraction of training is held out
    #[arg(long)]
    pub valid: Option<PathBuf>,

    #[arg(long, default_value_t = 0.2)]
    pub valid_fraction: f64,

    /// Picks the ranking weight k unless --k is given
    #[arg(long, value_enum, default_value = "wpdp")]
    pub scenario: ScenarioArg,

    /// Ranking-loss weight: loss = (1 - k)·cls + k·rank
    #[arg(long)]
    pub k: Option<f64>,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 10)]
    pub num_epochs: usize,

    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Width of token vectors (overridden by --embeddings' width)
    #[arg(long, default_value_t = 768)]
    pub embed_dim: usize,

    #[arg(long, default_value_t = 64)]
    pub gru_hidden_dim: usize,

    #[arg(long, default_value_t = 1)]
    pub gru_num_layers: usize,

    #[arg(long, default_value_t = 256)]
    pub bafn_hidden_dim: usize,

    #[arg(long, default_value_t = 0.2)]
    pub dropout: f64,

    #[arg(long)]
    pub no_layer_norm: bool,

    #[arg(long, default_value_t = 0.1)]
    pub margin: f64,

    /// Cap on (defective, clean) pairs per file; all pairs when absent
    #[arg(long)]
    pub max_pairs_per_file: Option<usize>,

    /// Rank lines by attention × file probability
    #[arg(long)]
    pub scale_by_file_probability: bool,

    #[arg(long, default_value_t = 5.0)]
    pub max_grad_norm: f64,

    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f64,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Train without balanced class weights
    #[arg(long)]
    pub no_class_weighting: bool,

    #[arg(long, value_enum, default_value = "best-validation")]
    pub checkpoint_policy: PolicyArg,

    #[arg(long, default_value_t = DEFAULT_MAX_TRAIN_LINES)]
    pub max_train_lines: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_LINE_TOKENS)]
    pub max_line_tokens: usize,

    /// HuggingFace tokenizer.json; the built-in code splitter otherwise
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,

    /// Text vector table (word2vec/GloVe format); hashed vectors otherwise
    #[arg(long)]
    pub embeddings: Option<PathBuf>,

    #[arg(long, default_value = "output/model")]
    pub checkpoint_dir: PathBuf,

    #[arg(long, default_value = "output/loss")]
    pub loss_dir: PathBuf,
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        let model = DefectModelConfig::new()
            .with_embed_dim(a.embed_dim)
            .with_gru_hidden_dim(a.gru_hidden_dim)
            .with_gru_num_layers(a.gru_num_layers)
            .with_bafn_hidden_dim(a.bafn_hidden_dim)
            .with_dropout(a.dropout)
            .with_use_layer_norm(!a.no_layer_norm);

        let ranking = RankingConfig::new()
            .with_margin(a.margin)
            .with_pair_sampling(match a.max_pairs_per_file {
                Some(max_pairs_per_file) => PairSampling::Sampled { max_pairs_per_file },
                None => PairSampling::All,
            })
            .with_scale_by_file_probability(a.scale_by_file_probability);

        let training = TrainingConfig::new(model, ranking)
            .for_scenario(a.scenario.into())
            .with_batch_size(a.batch_size)
            .with_num_epochs(a.num_epochs)
            .with_lr(a.lr)
            .with_max_grad_norm(a.max_grad_norm)
            .with_weight_decay(a.weight_decay)
            .with_seed(a.seed)
            .with_class_weighting(!a.no_class_weighting)
            .with_checkpoint_policy(a.checkpoint_policy.into());
        let training = match a.k {
            Some(k) => training.with_k(k),
            None    => training,
        };

        let embedder = match a.embeddings {
            Some(path) => EmbedderSpec::Table { path },
            None       => EmbedderSpec::Hashed { dim: a.embed_dim, seed: a.seed },
        };

        TrainConfig {
            project:         a.project,
            train_paths:     a.train,
            valid_path:      a.valid,
            valid_fraction:  a.valid_fraction,
            checkpoint_dir:  a.checkpoint_dir,
            loss_dir:        a.loss_dir,
            tokenizer:       a.tokenizer,
            embedder,
            max_train_lines: a.max_train_lines,
            max_line_tokens: a.max_line_tokens,
            training,
        }
    }
}

/// All arguments for the `predict` command
#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Project name used at training time
    #[arg(long)]
    pub project: String,

    /// Test release (JSON lines)
    #[arg(long)]
    pub test: PathBuf,

    #[arg(long, default_value = "output/model")]
    pub checkpoint_dir: PathBuf,

    /// Write one JSON prediction per file here
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Files with probability >= threshold are flagged and ranked
    #[arg(long, default_value_t = 0.5)]
    pub threshold: f64,
}

impl From<PredictArgs> for PredictRequest {
    fn from(a: PredictArgs) -> Self {
        PredictRequest {
            project:        a.project,
            test_path:      a.test,
            checkpoint_dir: a.checkpoint_dir,
            output:         a.output,
            threshold:      Some(a.threshold),
        }
    }
}
