// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with clap.
// All business logic is delegated to Layer 2 (application).
//
//   1. `train`   — trains a model on labelled releases
//   2. `predict` — loads a project's model, flags defective
//                  files and ranks their lines

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, PredictArgs, TrainArgs};

use crate::application::predict_use_case::PredictUseCase;
use crate::application::train_use_case::TrainUseCase;

#[derive(Parser, Debug)]
#[command(
    name = "bafn-linedp",
    version,
    about = "Predict defective files and rank their lines with a bilinear attention fusion network."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case. Only routing and printing here.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Predict(args) => run_predict(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    tracing::info!("Training project '{}' on {} release(s)", args.project, args.train.len());
    let summary = TrainUseCase::new(args.into()).execute()?;

    println!("Training complete. Best epoch: {}", summary.best_epoch);
    println!("  model:    {}", summary.model_dir.display());
    println!("  loss log: {}", summary.loss_log.display());
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    let report = PredictUseCase::new(args.into()).execute()?;
    let eval   = &report.evaluation;
    let show   = |v: Option<f64>| v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "n/a".into());

    println!(
        "Predicted {} files ({} flagged defective)",
        report.predictions.len(),
        report.predictions.iter().filter(|p| p.defective).count()
    );
    println!("  file AUC:      {}  ({} labelled files)", show(eval.file_auc), eval.labelled_files);
    println!("  mean IFA:      {}  ({} ranked defective files)", show(eval.mean_ifa), eval.ranked_files);
    println!("  Recall@20%LOC: {}", show(eval.mean_recall_at_20));
    Ok(())
}
