// ============================================================
// Layer 6 — Loss Record
// ============================================================
// Per-epoch training record, written to
// <loss_dir>/<project>-loss_record.csv after every epoch:
//
//   epoch,train_loss,train_cls_loss,train_rank_loss,k,valid_loss,valid_auc
//   1,0.61,0.66,0.42,0.2,0.58,0.71
//   2,0.55,0.60,0.37,0.2,0.57,
//
// The validation columns are empty when there was no validation
// set (or, for valid_auc, when it held a single class). The whole
// file is rewritten atomically each epoch and can be read back
// with read_history().

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::domain::error::{LineDpError, Result};
use crate::infra::checkpoint::write_atomic;

const HEADER: &str = "epoch,train_loss,train_cls_loss,train_rank_loss,k,valid_loss,valid_auc";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch:           usize,
    /// Mean joint loss over the epoch's batches
    pub train_loss:      f64,
    pub train_cls_loss:  f64,
    pub train_rank_loss: f64,
    pub k:               f64,
    pub valid_loss:      Option<f64>,
    pub valid_auc:       Option<f64>,
}

impl EpochRecord {
    /// Returns true if this epoch's validation AUC is at least
    /// `best`. Ties favour the later epoch.
    pub fn is_improvement(&self, best: Option<f64>) -> bool {
        match (self.valid_auc, best) {
            (Some(auc), Some(best)) => auc >= best,
            _ => true,
        }
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    pub fn new(loss_dir: impl Into<PathBuf>, project: &str) -> Result<Self> {
        let dir = loss_dir.into();
        fs::create_dir_all(&dir).map_err(|e| LineDpError::persistence(&dir, e))?;
        Ok(Self { csv_path: dir.join(format!("{project}-loss_record.csv")) })
    }

    /// Rewrite the CSV with every record so far.
    pub fn write(&self, history: &[EpochRecord]) -> Result<()> {
        let mut csv = String::from(HEADER);
        csv.push('\n');
        for r in history {
            // writing to a String cannot fail
            let _ = writeln!(
                csv,
                "{},{},{},{},{},{},{}",
                r.epoch,
                r.train_loss,
                r.train_cls_loss,
                r.train_rank_loss,
                r.k,
                optional(r.valid_loss),
                optional(r.valid_auc),
            );
        }
        write_atomic(&self.csv_path, csv.as_bytes())?;

        if let Some(last) = history.last() {
            tracing::debug!(
                "Logged epoch {} to '{}'",
                last.epoch,
                self.csv_path.display()
            );
        }
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

fn optional(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Parse a loss record CSV written by [`MetricsLogger::write`].
pub fn read_history(path: &Path) -> Result<Vec<EpochRecord>> {
    let text = fs::read_to_string(path).map_err(|e| LineDpError::persistence(path, e))?;
    let mut lines = text.lines();

    match lines.next() {
        Some(h) if h.trim() == HEADER => {}
        _ => return Err(LineDpError::persistence(path, "missing loss record header")),
    }

    lines
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, line)| {
            parse_row(line).ok_or_else(|| {
                LineDpError::persistence(path, format!("malformed row {}: '{line}'", i + 2))
            })
        })
        .collect()
}

fn parse_row(line: &str) -> Option<EpochRecord> {
    let cols: Vec<&str> = line.split(',').map(str::trim).collect();
    if cols.len() != 7 {
        return None;
    }
    Some(EpochRecord {
        epoch:           cols[0].parse().ok()?,
        train_loss:      cols[1].parse().ok()?,
        train_cls_loss:  cols[2].parse().ok()?,
        train_rank_loss: cols[3].parse().ok()?,
        k:               cols[4].parse().ok()?,
        valid_loss:      parse_optional(cols[5])?,
        valid_auc:       parse_optional(cols[6])?,
    })
}

/// `Some(None)` for an empty cell, `None` for garbage.
fn parse_optional<T: FromStr>(cell: &str) -> Option<Option<T>> {
    if cell.is_empty() {
        return Some(None);
    }
    cell.parse().ok().map(Some)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, auc: Option<f64>) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 0.5 + epoch as f64 / 3.0,
            train_cls_loss: 0.625,
            train_rank_loss: 0.1,
            k: 0.2,
            valid_loss: auc.map(|_| 0.4),
            valid_auc: auc,
        }
    }

    #[test]
    fn test_is_improvement() {
        let r = record(2, Some(0.7));
        assert!(r.is_improvement(Some(0.6)));
        assert!(r.is_improvement(Some(0.7)));
        assert!(!r.is_improvement(Some(0.8)));
        assert!(r.is_improvement(None));
        assert!(record(3, None).is_improvement(Some(0.9)));
    }

    #[test]
    fn test_history_round_trip() {
        let tmp    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(tmp.path().join("loss"), "activemq").unwrap();
        let history = vec![record(1, Some(0.75)), record(2, None)];
        logger.write(&history).unwrap();

        assert!(logger.csv_path().ends_with("activemq-loss_record.csv"));
        assert_eq!(read_history(logger.csv_path()).unwrap(), history);
    }

    #[test]
    fn test_rewrite_keeps_single_header() {
        let tmp    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(tmp.path(), "p").unwrap();
        logger.write(&[record(1, None)]).unwrap();
        logger.write(&[record(1, None), record(2, None)]).unwrap();

        let text = fs::read_to_string(logger.csv_path()).unwrap();
        assert_eq!(text.matches("epoch,").count(), 1);
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_malformed_row_is_rejected() {
        let tmp  = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.csv");
        fs::write(&path, format!("{HEADER}\n1,0.5,x,0.1,0.2,,\n")).unwrap();
        assert!(matches!(read_history(&path), Err(LineDpError::Persistence { .. })));
    }
}
