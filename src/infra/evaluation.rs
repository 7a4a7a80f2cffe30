// ============================================================
// Layer 6 — Evaluation Metrics
// ============================================================
// Scores a prediction run against ground truth:
//
//   file level   ROC AUC of the predicted probabilities
//   line level   IFA          clean lines inspected before the
//                             first defective one
//                Recall@20%   share of a file's defective lines
//                             found in the top 20% of its ranking
//
// Line-level metrics are averaged over files that are defective
// in ground truth and received a ranking (predicted defective).

use serde::Serialize;

pub const TOP_FRACTION: f64 = 0.2;

/// ROC AUC via the rank-sum statistic, ties sharing their mean rank.
/// `None` when only one class is present.
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 || scores.len() != labels.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based ranks i+1 ..= j+1 share their mean
        let mean_rank = (i + j + 2) as f64 / 2.0;
        rank_sum += mean_rank * order[i..=j].iter().filter(|&&k| labels[k]).count() as f64;
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Initial false alarm: clean lines ranked above the first defective
/// line. `ranked_labels` is in ranking order.
pub fn initial_false_alarm(ranked_labels: &[bool]) -> Option<usize> {
    ranked_labels.iter().position(|&defective| defective)
}

/// Fraction of defective lines inside the top `fraction` of the ranking.
pub fn recall_at_top_fraction(ranked_labels: &[bool], fraction: f64) -> Option<f64> {
    let total = ranked_labels.iter().filter(|&&l| l).count();
    if total == 0 {
        return None;
    }
    let inspected = ((ranked_labels.len() as f64) * fraction).ceil() as usize;
    let found = ranked_labels[..inspected.min(ranked_labels.len())]
        .iter()
        .filter(|&&l| l)
        .count();
    Some(found as f64 / total as f64)
}

/// One predicted file joined with its ground truth.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub probability:   f64,
    pub label:         Option<bool>,
    /// Ground-truth line labels in ranking order; empty when the
    /// file was not ranked
    pub ranked_labels: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationSummary {
    pub labelled_files:    usize,
    pub file_auc:          Option<f64>,
    pub ranked_files:      usize,
    pub mean_ifa:          Option<f64>,
    pub mean_recall_at_20: Option<f64>,
}

pub fn evaluate(outcomes: &[FileOutcome]) -> EvaluationSummary {
    let labelled: Vec<&FileOutcome> = outcomes.iter().filter(|o| o.label.is_some()).collect();
    let scores: Vec<f64> = labelled.iter().map(|o| o.probability).collect();
    let labels: Vec<bool> = labelled.iter().map(|o| o.label == Some(true)).collect();

    let ranked: Vec<&FileOutcome> = labelled
        .iter()
        .copied()
        .filter(|o| o.label == Some(true) && o.ranked_labels.iter().any(|&l| l))
        .collect();

    let ifa: Vec<f64> = ranked
        .iter()
        .filter_map(|o| initial_false_alarm(&o.ranked_labels))
        .map(|v| v as f64)
        .collect();
    let recall: Vec<f64> = ranked
        .iter()
        .filter_map(|o| recall_at_top_fraction(&o.ranked_labels, TOP_FRACTION))
        .collect();

    EvaluationSummary {
        labelled_files:    labelled.len(),
        file_auc:          roc_auc(&scores, &labels),
        ranked_files:      ranked.len(),
        mean_ifa:          mean(&ifa),
        mean_recall_at_20: mean(&recall),
    }
}

fn mean(xs: &[f64]) -> Option<f64> {
    (!xs.is_empty()).then(|| xs.iter().sum::<f64>() / xs.len() as f64)
}
