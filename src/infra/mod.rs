// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by more than one layer:
//
//   checkpoint.rs — model weights (full-precision MessagePack,
//                   gzip) and the JSON pipeline config, written
//                   atomically
//
//   metrics.rs    — per-epoch loss record CSV, written after
//                   every epoch and readable back
//
//   evaluation.rs — file-level AUC, line-level IFA and
//                   Recall@20% for prediction runs
//
// Reference: Burn Book §5 (Checkpointing)
//            Rust Book §9 (Error Handling)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training loss record
pub mod metrics;

/// Prediction quality metrics
pub mod evaluation;
