// ============================================================
// Layer 4 — File Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<FileSample>
// into padded tensors plus the mask metadata describing them.
//
// Shapes (F files, L = max lines, T = max tokens, E = embed_dim):
//
//   embeddings   [F, L, T, E]   token vectors, zero on padding
//   token_mask   [F, L, T]      1 = real token,  0 = padding
//   line_mask    [F, L]         1 = real line,   0 = padding
//   file_labels  [F, 1]         ground truth (0 when unlabelled)
//   line_labels  [F, L]         ground truth per line
//
// Padding is always on the right: real lines come first within a
// file and real tokens come first within a line.
//
// BatchMeta keeps the same information host-side. check_shape()
// compares the two before any numeric work, so a batch whose
// metadata disagrees with its masks never reaches the encoder.

use std::sync::Arc;

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::FileSample;
use crate::domain::error::{LineDpError, Result};
use crate::domain::traits::TokenEmbedder;

// ─── BatchMeta ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMeta {
    pub file_ids:     Vec<String>,
    /// Source line numbers of the real lines, per file
    pub line_numbers: Vec<Vec<usize>>,
    /// Real token count of every real line, per file
    pub token_counts: Vec<Vec<usize>>,
    pub file_labels:  Vec<Option<bool>>,
    pub line_labels:  Vec<Vec<bool>>,
    pub max_lines:    usize,
    pub max_tokens:   usize,
}

impl BatchMeta {
    pub fn file_count(&self) -> usize {
        self.file_ids.len()
    }

    pub fn line_count(&self, file: usize) -> usize {
        self.token_counts[file].len()
    }
}

// ─── FileBatch ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct FileBatch<B: Backend> {
    pub embeddings:  Tensor<B, 4>,
    pub token_mask:  Tensor<B, 3>,
    pub line_mask:   Tensor<B, 2>,
    pub file_labels: Tensor<B, 2>,
    pub line_labels: Tensor<B, 2>,
    pub meta:        BatchMeta,
}

impl<B: Backend> FileBatch<B> {
    /// Fail fast when the batch cannot be fed to a model with
    /// input width `embed_dim`: empty files or lines, ragged
    /// metadata, or masks that disagree with the metadata.
    pub fn check_shape(&self, embed_dim: usize) -> Result<()> {
        let meta = &self.meta;
        let f    = meta.file_count();
        let (l, t) = (meta.max_lines, meta.max_tokens);

        if f == 0 {
            return Err(LineDpError::input_shape(None, "batch contains no files"));
        }
        if meta.line_numbers.len() != f
            || meta.token_counts.len() != f
            || meta.file_labels.len() != f
            || meta.line_labels.len() != f
        {
            return Err(LineDpError::input_shape(None, "batch metadata lists differ in length"));
        }

        let expect = |name: &str, got: &[usize], want: &[usize]| {
            if got == want {
                Ok(())
            } else {
                Err(LineDpError::input_shape(
                    None,
                    format!("{name} has shape {got:?}, metadata implies {want:?}"),
                ))
            }
        };
        expect("embeddings",  &self.embeddings.dims(),  &[f, l, t, embed_dim])?;
        expect("token_mask",  &self.token_mask.dims(),  &[f, l, t])?;
        expect("line_mask",   &self.line_mask.dims(),   &[f, l])?;
        expect("file_labels", &self.file_labels.dims(), &[f, 1])?;
        expect("line_labels", &self.line_labels.dims(), &[f, l])?;

        for (i, counts) in meta.token_counts.iter().enumerate() {
            let id = meta.file_ids[i].as_str();
            if counts.is_empty() {
                return Err(LineDpError::input_shape(Some(id), "file has no lines"));
            }
            if counts.len() > l {
                return Err(LineDpError::input_shape(
                    Some(id),
                    format!("{} lines exceed padded line count {}", counts.len(), l),
                ));
            }
            if meta.line_numbers[i].len() != counts.len() || meta.line_labels[i].len() != counts.len() {
                return Err(LineDpError::input_shape(Some(id), "per-line metadata is ragged"));
            }
            if let Some(pos) = counts.iter().position(|&c| c == 0 || c > t) {
                return Err(LineDpError::input_shape(
                    Some(id),
                    format!(
                        "line {} has {} tokens (padded width {})",
                        meta.line_numbers[i][pos], counts[pos], t
                    ),
                ));
            }
        }

        self.check_masks()
    }

    /// Compare the mask tensors value-by-value with the metadata.
    fn check_masks(&self) -> Result<()> {
        let meta = &self.meta;
        let (l, t) = (meta.max_lines, meta.max_tokens);
        let line_mask  = tensor_to_vec(self.line_mask.clone())?;
        let token_mask = tensor_to_vec(self.token_mask.clone())?;

        for (i, counts) in meta.token_counts.iter().enumerate() {
            let id = meta.file_ids[i].as_str();
            let row = &line_mask[i * l..(i + 1) * l];
            if !is_prefix_mask(row, counts.len()) {
                return Err(LineDpError::input_shape(
                    Some(id),
                    format!("line mask does not mark exactly {} leading lines", counts.len()),
                ));
            }
            for j in 0..l {
                let real = counts.get(j).copied().unwrap_or(0);
                let row  = &token_mask[(i * l + j) * t..(i * l + j + 1) * t];
                if !is_prefix_mask(row, real) {
                    return Err(LineDpError::input_shape(
                        Some(id),
                        format!("token mask of padded line slot {j} does not match {real} tokens"),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn is_prefix_mask(row: &[f32], real: usize) -> bool {
    row.iter()
        .enumerate()
        .all(|(i, &v)| if i < real { v == 1.0 } else { v == 0.0 })
}

/// Copy a float tensor to the host as f32.
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| LineDpError::input_shape(None, format!("cannot read tensor: {e:?}")))
}

// ─── FileBatcher ──────────────────────────────────────────────────────────────
#[derive(Clone)]
pub struct FileBatcher<B: Backend> {
    pub device: B::Device,
    embedder:   Arc<dyn TokenEmbedder>,
}

impl<B: Backend> FileBatcher<B> {
    pub fn new(device: B::Device, embedder: Arc<dyn TokenEmbedder>) -> Self {
        Self { device, embedder }
    }

    pub fn embed_dim(&self) -> usize {
        self.embedder.dim()
    }

    /// Pad, embed and mask `items` into one batch.
    pub fn assemble(&self, items: &[FileSample]) -> FileBatch<B> {
        let f = items.len();
        let l = items.iter().map(FileSample::line_count).max().unwrap_or(0);
        let t = items.iter().map(FileSample::max_tokens).max().unwrap_or(0);
        let e = self.embedder.dim();

        let mut embeddings  = vec![0.0f32; f * l * t * e];
        let mut token_mask  = vec![0.0f32; f * l * t];
        let mut line_mask   = vec![0.0f32; f * l];
        let mut file_labels = vec![0.0f32; f];
        let mut line_labels = vec![0.0f32; f * l];

        let mut meta = BatchMeta {
            file_ids:     Vec::with_capacity(f),
            line_numbers: Vec::with_capacity(f),
            token_counts: Vec::with_capacity(f),
            file_labels:  Vec::with_capacity(f),
            line_labels:  Vec::with_capacity(f),
            max_lines:    l,
            max_tokens:   t,
        };

        for (i, sample) in items.iter().enumerate() {
            file_labels[i] = if sample.label == Some(true) { 1.0 } else { 0.0 };

            for (j, line) in sample.lines.iter().enumerate() {
                let slot = i * l + j;
                line_mask[slot]   = 1.0;
                line_labels[slot] = if line.label { 1.0 } else { 0.0 };

                for (k, token) in line.tokens.iter().enumerate() {
                    let pos = slot * t + k;
                    token_mask[pos] = 1.0;
                    self.embedder.embed_into(token, &mut embeddings[pos * e..(pos + 1) * e]);
                }
            }

            meta.file_ids.push(sample.file_id.clone());
            meta.line_numbers.push(sample.lines.iter().map(|x| x.index).collect());
            meta.token_counts.push(sample.lines.iter().map(|x| x.tokens.len()).collect());
            meta.file_labels.push(sample.label);
            meta.line_labels.push(sample.lines.iter().map(|x| x.label).collect());
        }

        FileBatch {
            embeddings: Tensor::<B, 1>::from_floats(embeddings.as_slice(), &self.device)
                .reshape([f, l, t, e]),
            token_mask: Tensor::<B, 1>::from_floats(token_mask.as_slice(), &self.device)
                .reshape([f, l, t]),
            line_mask: Tensor::<B, 1>::from_floats(line_mask.as_slice(), &self.device)
                .reshape([f, l]),
            file_labels: Tensor::<B, 1>::from_floats(file_labels.as_slice(), &self.device)
                .reshape([f, 1]),
            line_labels: Tensor::<B, 1>::from_floats(line_labels.as_slice(), &self.device)
                .reshape([f, l]),
            meta,
        }
    }
}

impl<B: Backend> Batcher<FileSample, FileBatch<B>> for FileBatcher<B> {
    fn batch(&self, items: Vec<FileSample>) -> FileBatch<B> {
        self.assemble(&items)
    }
}
