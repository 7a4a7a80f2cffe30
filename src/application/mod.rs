// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal each:
// training a project, or predicting a test release with it.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination, with anyhow contexts on
//     every failure a user can act on

/// The training workflow
pub mod train_use_case;

/// The prediction + evaluation workflow
pub mod predict_use_case;
