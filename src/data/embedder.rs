// ============================================================
// Layer 4 — Token Embedders
// ============================================================
// Implementations of the TokenEmbedder capability.
//
//   EmbeddingTable — pretrained vectors in the plain-text format
//                    used by word2vec / GloVe exports:
//                        [<count> <dim>]          (optional header)
//                        <token> <f1> <f2> ... <fd>
//                    Out-of-vocabulary tokens get the table mean.
//
//   HashedEmbedder — a deterministic pseudo-random vector per token
//                    (FNV-1a hash seeds a ChaCha stream). Lets the
//                    pipeline run without any pretrained table.
//
// EmbedderSpec is the serialisable description saved next to
// a checkpoint so prediction rebuilds the exact same embedder.

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::domain::error::LineDpError;
use crate::domain::traits::TokenEmbedder;

// ─── EmbedderSpec ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbedderSpec {
    Hashed { dim: usize, seed: u64 },
    Table { path: PathBuf },
}

impl EmbedderSpec {
    pub fn build(&self) -> Result<Arc<dyn TokenEmbedder>> {
        match self {
            Self::Hashed { dim, seed } => Ok(Arc::new(HashedEmbedder::new(*dim, *seed)?)),
            Self::Table { path }       => Ok(Arc::new(EmbeddingTable::from_text_file(path)?)),
        }
    }
}

// ─── EmbeddingTable ───────────────────────────────────────────────────────────
pub struct EmbeddingTable {
    dim:     usize,
    index:   HashMap<String, usize>,
    vectors: Vec<f32>,
    unknown: Vec<f32>,
}

impl EmbeddingTable {
    pub fn from_text_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Cannot open embedding table '{}'", path.display()))?;
        let lines = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("Cannot read embedding table '{}'", path.display()))?;

        let table = Self::parse(lines.iter().map(String::as_str))
            .with_context(|| format!("Invalid embedding table '{}'", path.display()))?;
        tracing::info!(
            "Loaded {} token vectors (dim={}) from '{}'",
            table.len(), table.dim, path.display()
        );
        Ok(table)
    }

    pub fn parse<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut dim     = 0usize;
        let mut index   = HashMap::new();
        let mut vectors = Vec::new();

        for (i, line) in lines.enumerate() {
            let mut parts = line.split_whitespace();
            let Some(token) = parts.next() else { continue };
            let values = parts
                .map(str::parse::<f32>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .with_context(|| format!("Non-numeric value on line {}", i + 1))?;

            // word2vec header: "<count> <dim>"
            if i == 0 && values.len() == 1 && token.parse::<usize>().is_ok() {
                continue;
            }
            if dim == 0 {
                dim = values.len();
            }
            if values.len() != dim || dim == 0 {
                return Err(LineDpError::Configuration(format!(
                    "line {} has {} values, expected {}", i + 1, values.len(), dim
                )).into());
            }
            if index.insert(token.to_string(), index.len()).is_some() {
                anyhow::bail!("duplicate token '{}' on line {}", token, i + 1);
            }
            vectors.extend(values);
        }

        if index.is_empty() {
            anyhow::bail!("embedding table is empty");
        }

        let count   = index.len() as f32;
        let mut unknown = vec![0.0f32; dim];
        for row in vectors.chunks(dim) {
            for (u, v) in unknown.iter_mut().zip(row) {
                *u += v / count;
            }
        }
        Ok(Self { dim, index, vectors, unknown })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }
}

impl TokenEmbedder for EmbeddingTable {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_into(&self, token: &str, out: &mut [f32]) {
        match self.index.get(token) {
            Some(&row) => out.copy_from_slice(&self.vectors[row * self.dim..(row + 1) * self.dim]),
            None       => out.copy_from_slice(&self.unknown),
        }
    }
}

// ─── HashedEmbedder ───────────────────────────────────────────────────────────
pub struct HashedEmbedder {
    dim:   usize,
    seed:  u64,
    scale: f32,
}

impl HashedEmbedder {
    pub fn new(dim: usize, seed: u64) -> std::result::Result<Self, LineDpError> {
        if dim == 0 {
            return Err(LineDpError::Configuration("hashed embedding dim must be > 0".into()));
        }
        Ok(Self { dim, seed, scale: (3.0 / dim as f32).sqrt() })
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

impl TokenEmbedder for HashedEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_into(&self, token: &str, out: &mut [f32]) {
        let mut rng = ChaCha8Rng::seed_from_u64(fnv1a(token.as_bytes()) ^ self.seed);
        for v in out.iter_mut() {
            *v = rng.gen_range(-self.scale..self.scale);
        }
    }
}
