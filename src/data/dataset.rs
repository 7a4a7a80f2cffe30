use burn::data::dataset::Dataset;

use crate::domain::error::{LineDpError, Result};
use crate::domain::source_file::{Release, SourceFile};

/// Truncation applied when turning a SourceFile into a sample.
#[derive(Debug, Clone, Copy)]
pub struct SampleLimits {
    /// Keep at most this many lines per file (`None` keeps all, used at test time)
    pub max_lines:       Option<usize>,
    /// Tokens beyond this position in a line are cut off. The batcher
    /// pads every line of a batch up to the longest surviving line.
    pub max_line_tokens: usize,
}

impl SampleLimits {
    pub fn training(max_lines: usize, max_line_tokens: usize) -> Self {
        Self { max_lines: Some(max_lines), max_line_tokens }
    }

    pub fn inference(max_line_tokens: usize) -> Self {
        Self { max_lines: None, max_line_tokens }
    }
}

#[derive(Debug, Clone)]
pub struct LineSample {
    /// Line number in the source file, carried through to the ranking
    pub index:  usize,
    /// Already truncated to `max_line_tokens`
    pub tokens: Vec<String>,
    /// Ground-truth defect label; `false` when the source had none
    pub label:  bool,
}

/// One validated file: at least one line, every line at least one token.
#[derive(Debug, Clone)]
pub struct FileSample {
    /// Path-like identifier, unique within a release
    pub file_id: String,
    /// Release the file was loaded from
    pub release: String,
    /// File-level label; `None` for unlabelled prediction input
    pub label:   Option<bool>,
    /// Lines in source order
    pub lines:   Vec<LineSample>,
}

impl FileSample {
    pub fn from_source(file: &SourceFile, limits: &SampleLimits) -> Result<Self> {
        if file.lines.is_empty() {
            return Err(LineDpError::input_shape(Some(&file.file_id), "file has no lines"));
        }
        if limits.max_line_tokens == 0 {
            return Err(LineDpError::Configuration("max_line_tokens must be > 0".into()));
        }

        let keep = limits.max_lines.unwrap_or(usize::MAX).min(file.lines.len());
        let mut lines = Vec::with_capacity(keep);
        for line in &file.lines[..keep] {
            if line.tokens.is_empty() {
                return Err(LineDpError::input_shape(
                    Some(&file.file_id),
                    format!("line {} has no tokens", line.index),
                ));
            }
            let take = line.tokens.len().min(limits.max_line_tokens);
            lines.push(LineSample {
                index:  line.index,
                tokens: line.tokens[..take].to_vec(),
                label:  line.is_defective(),
            });
        }

        // A file is defective iff one of its lines is, when only line labels are known
        let label = file.label.or_else(|| {
            file.lines
                .iter()
                .any(|l| l.label.is_some())
                .then(|| file.lines.iter().any(|l| l.is_defective()))
        });

        Ok(Self {
            file_id: file.file_id.clone(),
            release: file.release.clone(),
            label,
            lines,
        })
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn max_tokens(&self) -> usize {
        self.lines.iter().map(|l| l.tokens.len()).max().unwrap_or(0)
    }
}

/// Balanced class weights, `n / (2 * n_class)` per class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassWeights {
    /// BCE weight applied to defective files
    pub defect: f32,
    /// BCE weight applied to clean files
    pub clean:  f32,
}

impl ClassWeights {
    pub const UNIFORM: Self = Self { defect: 1.0, clean: 1.0 };

    pub fn balanced(defect_count: usize, clean_count: usize) -> Self {
        if defect_count == 0 || clean_count == 0 {
            return Self::UNIFORM;
        }
        let n = (defect_count + clean_count) as f32;
        Self {
            defect: n / (2.0 * defect_count as f32),
            clean:  n / (2.0 * clean_count as f32),
        }
    }

    pub fn weight(&self, defective: bool) -> f32 {
        if defective { self.defect } else { self.clean }
    }
}

pub struct FileDataset {
    samples: Vec<FileSample>,
}

impl FileDataset {
    pub fn new(samples: Vec<FileSample>) -> Self { Self { samples } }

    pub fn from_release(release: &Release, limits: &SampleLimits) -> Result<Self> {
        let samples = release
            .files
            .iter()
            .map(|f| FileSample::from_source(f, limits))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(samples))
    }

    pub fn samples(&self) -> &[FileSample] { &self.samples }

    pub fn into_samples(self) -> Vec<FileSample> { self.samples }

    pub fn class_weights(&self) -> ClassWeights {
        let defect = self.samples.iter().filter(|s| s.label == Some(true)).count();
        let clean  = self.samples.iter().filter(|s| s.label == Some(false)).count();
        ClassWeights::balanced(defect, clean)
    }
}

impl Dataset<FileSample> for FileDataset {
    fn get(&self, index: usize) -> Option<FileSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::source_file::SourceLine;

    fn file(lines: Vec<(Vec<&str>, Option<bool>)>) -> SourceFile {
        lines.into_iter().enumerate().fold(SourceFile::new("f.java", "r"), |f, (i, (toks, label))| {
            let mut line = SourceLine::new(i + 1, toks.join(" ")).with_tokens(toks);
            line.label = label;
            f.with_line(line)
        })
    }

    #[test]
    fn test_truncates_lines_and_tokens() {
        let src = file(vec![(vec!["a", "b", "c"], None), (vec!["d"], None), (vec!["e"], None)]);
        let s   = FileSample::from_source(&src, &SampleLimits::training(2, 2)).unwrap();
        assert_eq!(s.line_count(), 2);
        assert_eq!(s.lines[0].tokens, vec!["a", "b"]);
        assert_eq!(s.max_tokens(), 2);
    }

    #[test]
    fn test_inference_limits_keep_every_line() {
        let src = file(vec![(vec!["a"], None); 5]);
        let s   = FileSample::from_source(&src, &SampleLimits::inference(10)).unwrap();
        assert_eq!(s.line_count(), 5);
    }

    #[test]
    fn test_rejects_empty_file() {
        let err = FileSample::from_source(&SourceFile::new("e.java", "r"), &SampleLimits::inference(8));
        assert!(matches!(err, Err(LineDpError::InputShape { .. })));
    }

    #[test]
    fn test_rejects_line_without_tokens() {
        let src = file(vec![(vec!["a"], None), (vec![], None)]);
        let err = FileSample::from_source(&src, &SampleLimits::inference(8)).unwrap_err();
        assert!(err.to_string().contains("line 2 has no tokens"));
    }

    #[test]
    fn test_file_label_derived_from_line_labels() {
        let src = file(vec![(vec!["a"], Some(false)), (vec!["b"], Some(true))]);
        let s   = FileSample::from_source(&src, &SampleLimits::inference(8)).unwrap();
        assert_eq!(s.label, Some(true));

        let unlabelled = file(vec![(vec!["a"], None)]);
        let s = FileSample::from_source(&unlabelled, &SampleLimits::inference(8)).unwrap();
        assert_eq!(s.label, None);
    }

    #[test]
    fn test_balanced_class_weights() {
        let w = ClassWeights::balanced(1, 3);
        assert!((w.defect - 2.0).abs() < 1e-6);
        assert!((w.clean - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(ClassWeights::balanced(0, 4), ClassWeights::UNIFORM);
    }
}
