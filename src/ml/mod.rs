// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All model, loss and training code lives here.
//
//   encoder.rs    — stacked GRU over the tokens of each line
//   attention.rs  — bilinear attention fusion (BAFN): token
//                   attention per line, line attention per file
//   model.rs      — encoder + BAFN + file classifier head
//   ranker.rs     — line scores and stable line ranking
//   loss.rs       — (1 − k)·BCE + k·pairwise hinge
//   trainer.rs    — epoch loop, validation, checkpoint policy
//   inferencer.rs — batched prediction from a checkpoint
//   backend.rs    — NdArray by default, WGPU behind a feature
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Cho et al. (2014) GRU

pub mod backend;

/// Line encoder (token GRU)
pub mod encoder;

/// Bilinear attention fusion network
pub mod attention;

/// Full defect model
pub mod model;

pub mod ranker;

/// Joint classification + ranking loss
pub mod loss;

/// Training loop with validation and checkpointing
pub mod trainer;

/// Prediction engine
pub mod inferencer;
