// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits that define the core
// concepts of line-level defect prediction:
//
//   source_file.rs — Release, SourceFile and SourceLine
//   traits.rs      — TokenEmbedder and ReleaseSource capabilities
//   error.rs       — the LineDpError taxonomy shared by every layer
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

/// Releases, files and lines as loaded from preprocessing output
pub mod source_file;

/// Capabilities other layers implement
pub mod traits;

/// Error taxonomy for the prediction core
pub mod error;
