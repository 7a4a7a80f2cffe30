// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from a preprocessed release file to padded,
// masked tensor batches:
//
//   release.jsonl
//       │
//       ▼
//   JsonlReleaseLoader → Release of SourceFiles
//       │
//       ▼
//   CodeTokenizer      → tokens for lines that carry only code
//       │
//       ▼
//   FileDataset        → validated, truncated FileSamples
//       │
//       ▼
//   FileBatcher        → TokenEmbedder vectors + masks per batch
//
// splitter.rs holds out validation files when a project has no
// dedicated validation release.

/// Reads JSON-lines release files
pub mod loader;

/// Splits code lines into tokens
pub mod tokenizer;

/// TokenEmbedder implementations
pub mod embedder;

/// Implements Burn's Dataset trait for file samples
pub mod dataset;

/// Implements Burn's Batcher trait with explicit mask metadata
pub mod batcher;

/// Seeded train/validation split
pub mod splitter;
