// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The encoder never knows where token vectors come from, and the
// application layer never knows where releases are stored. Both
// are capabilities expressed as traits:
//
//   TokenEmbedder  — pretrained table, hashed vectors, ...
//   ReleaseSource  — JSON-lines files, ...

use anyhow::Result;

use crate::domain::source_file::Release;

// ─── TokenEmbedder ────────────────────────────────────────────────────────────
/// Anything that maps a source-code token to a fixed-width vector.
///
/// Implementations:
///   - EmbeddingTable → pretrained vectors loaded from a text file
///   - HashedEmbedder → deterministic pseudo-random vectors
pub trait TokenEmbedder: Send + Sync {
    /// Width of every vector this embedder produces.
    fn dim(&self) -> usize;

    /// Write the vector for `token` into `out` (`out.len() == self.dim()`).
    /// Unknown tokens must still receive a vector.
    fn embed_into(&self, token: &str, out: &mut [f32]);

    fn embed(&self, token: &str) -> Vec<f32> {
        let mut out = vec![0.0; self.dim()];
        self.embed_into(token, &mut out);
        out
    }
}

// ─── ReleaseSource ────────────────────────────────────────────────────────────
/// Any component that can load one release.
///
/// Implementations:
///   - JsonlReleaseLoader → one JSON record per line
pub trait ReleaseSource {
    fn load_release(&self) -> Result<Release>;
}
