// ============================================================
// Layer 4 — Release Loader
// ============================================================
// Reads a preprocessed release from a JSON-lines file: one
// SourceFile record per line, in file order.
//
// Structural problems are fatal. A file without lines is a
// corrupt record and training on a silently shortened corpus
// would skew every metric, so the whole load fails.

use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::domain::error::LineDpError;
use crate::domain::source_file::{Release, ReleaseRole, SourceFile};
use crate::domain::traits::ReleaseSource;

pub struct JsonlReleaseLoader {
    path: PathBuf,
    role: ReleaseRole,
}

impl JsonlReleaseLoader {
    pub fn new(path: impl Into<PathBuf>, role: ReleaseRole) -> Self {
        Self { path: path.into(), role }
    }

    /// Release name: the file stem, e.g. `activemq-5.0.0.jsonl` → `activemq-5.0.0`
    fn release_name(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

impl ReleaseSource for JsonlReleaseLoader {
    fn load_release(&self) -> Result<Release> {
        let name  = self.release_name();
        let files = read_files(&self.path, &name)?;

        tracing::info!(
            "Loaded release '{}' ({:?}): {} files",
            name, self.role, files.len()
        );
        Ok(Release::new(name, self.role, files))
    }
}

fn read_files(path: &Path, release: &str) -> Result<Vec<SourceFile>> {
    let file = File::open(path)
        .with_context(|| format!("Cannot open release file '{}'", path.display()))?;

    let mut files = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }

        let mut record: SourceFile = serde_json::from_str(&line).with_context(|| {
            format!("Malformed record at {}:{}", path.display(), line_no + 1)
        })?;

        if record.lines.is_empty() {
            return Err(LineDpError::input_shape(Some(&record.file_id), "file has no lines"))
                .with_context(|| format!("Rejected record at {}:{}", path.display(), line_no + 1));
        }
        if record.release.is_empty() {
            record.release = release.to_string();
        }
        files.push(record);
    }
    Ok(files)
}
