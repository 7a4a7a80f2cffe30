// ============================================================
// Layer 3 — Release / SourceFile / SourceLine
// ============================================================
// The immutable inputs of the predictor, exactly as produced by
// preprocessing. A Release owns its files, a file owns its
// lines, a line owns its tokens — order is significant at every
// level and is never changed after loading.
//
// Labels are optional: they are present for training and
// validation releases and absent at pure-inference time.

use serde::{Deserialize, Serialize};

/// Role assigned to a release by whoever prepared the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseRole {
    Train,
    Validate,
    Test,
}

/// One line of source code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLine {
    /// 1-based line number in the original file
    pub index: usize,

    /// Raw code text, kept for reporting
    #[serde(default)]
    pub code: String,

    /// Pre-split tokens; when empty the configured tokenizer
    /// splits `code` instead
    #[serde(default)]
    pub tokens: Vec<String>,

    /// Ground truth: does this line carry a defect?
    #[serde(default)]
    pub label: Option<bool>,
}

impl SourceLine {
    pub fn new(index: usize, code: impl Into<String>) -> Self {
        Self {
            index,
            code:   code.into(),
            tokens: Vec::new(),
            label:  None,
        }
    }

    pub fn with_tokens<S: Into<String>>(mut self, tokens: impl IntoIterator<Item = S>) -> Self {
        self.tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_label(mut self, label: bool) -> Self {
        self.label = Some(label);
        self
    }

    pub fn is_defective(&self) -> bool {
        self.label.unwrap_or(false)
    }
}

/// One source file of a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub file_id: String,

    #[serde(default)]
    pub release: String,

    /// Ground truth: does the file contain at least one defect?
    #[serde(default)]
    pub label: Option<bool>,

    pub lines: Vec<SourceLine>,
}

impl SourceFile {
    pub fn new(file_id: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            release: release.into(),
            label:   None,
            lines:   Vec::new(),
        }
    }

    pub fn with_label(mut self, label: bool) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_line(mut self, line: SourceLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn defective_line_count(&self) -> usize {
        self.lines.iter().filter(|l| l.is_defective()).count()
    }
}

/// A named snapshot of a project.
#[derive(Debug, Clone)]
pub struct Release {
    pub name:  String,
    pub role:  ReleaseRole,
    pub files: Vec<SourceFile>,
}

impl Release {
    pub fn new(name: impl Into<String>, role: ReleaseRole, files: Vec<SourceFile>) -> Self {
        Self { name: name.into(), role, files }
    }

    pub fn defective_file_count(&self) -> usize {
        self.files.iter().filter(|f| f.label == Some(true)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialises_minimal_record() {
        let json = r#"{"file_id":"a.java","lines":[{"index":1,"code":"int x;"}]}"#;
        let file: SourceFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.file_id, "a.java");
        assert_eq!(file.label, None);
        assert!(file.lines[0].tokens.is_empty());
        assert_eq!(file.lines[0].label, None);
    }

    #[test]
    fn test_defective_line_count() {
        let file = SourceFile::new("a.java", "r1")
            .with_line(SourceLine::new(1, "a").with_label(false))
            .with_line(SourceLine::new(2, "b").with_label(true))
            .with_line(SourceLine::new(3, "c"));
        assert_eq!(file.defective_line_count(), 1);
    }

    #[test]
    fn test_release_role_serialises_lowercase() {
        let json = serde_json::to_string(&ReleaseRole::Validate).unwrap();
        assert_eq!(json, "\"validate\"");
    }
}
