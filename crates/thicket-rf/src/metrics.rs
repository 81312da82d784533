//! Confusion matrix, per-class metrics, ROC AUC and the validation report.
//!
//! Every ratio with a zero denominator is reported as 0.0.

use std::fmt;

use crate::{error::RfError, predict::ClassScores};

/// A confusion matrix for multi-class classification.
///
/// Entry `(true_class, predicted_class)` counts how many examples with true
/// label `true_class` were predicted as `predicted_class`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConfusionMatrix {
    n_classes: usize,
    counts: Vec<usize>,
}

/// Per-class precision, recall, and F1 score.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ClassMetrics {
    /// The class index.
    pub class: usize,
    /// TP / (TP + FP).
    pub precision: f64,
    /// TP / (TP + FN).
    pub recall: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
    /// Number of true examples in this class.
    pub support: usize,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

impl ConfusionMatrix {
    /// Build a confusion matrix from true and predicted labels.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::EmptyDataset`] | zero labels provided |
    /// | [`RfError::LengthMismatch`] | the two slices differ in length |
    /// | [`RfError::LabelOutOfRange`] | a true or predicted label is `>= n_classes` |
    pub fn from_labels(
        true_labels: &[usize],
        predicted: &[usize],
        n_classes: usize,
    ) -> Result<Self, RfError> {
        if true_labels.is_empty() {
            return Err(RfError::EmptyDataset);
        }
        if true_labels.len() != predicted.len() {
            return Err(RfError::LengthMismatch {
                expected: true_labels.len(),
                got: predicted.len(),
            });
        }
        let mut counts = vec![0usize; n_classes * n_classes];
        for (example_index, (&t, &p)) in true_labels.iter().zip(predicted).enumerate() {
            if let Some(label) = [t, p].into_iter().find(|&l| l >= n_classes) {
                return Err(RfError::LabelOutOfRange {
                    example_index,
                    label,
                    n_classes,
                });
            }
            counts[t * n_classes + p] += 1;
        }
        Ok(Self { n_classes, counts })
    }

    /// Return the count for `(true_class, predicted_class)`.
    #[must_use]
    pub fn get(&self, true_class: usize, predicted_class: usize) -> usize {
        self.counts[true_class * self.n_classes + predicted_class]
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Overall accuracy: proportion of correct predictions.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let correct: usize = (0..self.n_classes).map(|c| self.get(c, c)).sum();
        let total: usize = self.counts.iter().sum();
        ratio(correct as f64, total as f64)
    }

    /// Per-class precision, recall, F1, and support.
    #[must_use]
    pub fn class_metrics(&self) -> Vec<ClassMetrics> {
        (0..self.n_classes)
            .map(|c| {
                let tp = self.get(c, c);
                let predicted: usize = (0..self.n_classes).map(|t| self.get(t, c)).sum();
                let support: usize = (0..self.n_classes).map(|p| self.get(c, p)).sum();
                let precision = ratio(tp as f64, predicted as f64);
                let recall = ratio(tp as f64, support as f64);
                ClassMetrics {
                    class: c,
                    precision,
                    recall,
                    f1: ratio(2.0 * precision * recall, precision + recall),
                    support,
                }
            })
            .collect()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for j in 0..self.n_classes {
            write!(f, " pred_{j:>3}")?;
        }
        writeln!(f)?;
        for i in 0..self.n_classes {
            write!(f, "true_{i:>3}")?;
            for j in 0..self.n_classes {
                write!(f, " {:>8}", self.get(i, j))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Area under the ROC curve of `scores` against binary `positive` flags.
///
/// Rank-based (Mann-Whitney) with tied scores sharing their average rank.
/// Returns 0.0 when either class is absent.
#[must_use]
pub fn roc_auc(scores: &[f64], positive: &[bool]) -> f64 {
    let n_pos = positive.iter().filter(|&&p| p).count();
    let n_neg = positive.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1 ..= end share their mean
        let mean_rank = (start + 1 + end) as f64 / 2.0;
        let n_tied_pos = order[start..end].iter().filter(|&&i| positive[i]).count();
        positive_rank_sum += mean_rank * n_tied_pos as f64;
        start = end;
    }

    let n_pos = n_pos as f64;
    (positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64)
}

/// Area under the precision-recall curve of `scores` against `positive`.
///
/// Examples are taken in descending score order, tied scores as one step;
/// each step adds `(recall gain) * precision`. Returns 0.0 when there are
/// no positives.
#[must_use]
pub fn pr_auc(scores: &[f64], positive: &[bool]) -> f64 {
    let n_pos = positive.iter().filter(|&&p| p).count();
    if n_pos == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let (mut tp, mut seen) = (0usize, 0usize);
    let mut last_recall = 0.0;
    let mut area = 0.0;
    for group in order.chunk_by(|&a, &b| scores[a] == scores[b]) {
        tp += group.iter().filter(|&&i| positive[i]).count();
        seen += group.len();
        let recall = tp as f64 / n_pos as f64;
        let precision = tp as f64 / seen as f64;
        area += (recall - last_recall) * precision;
        last_recall = recall;
    }
    area.min(1.0)
}

/// Quality of a forest's predictions on a labeled set.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PerformanceReport {
    /// Number of evaluated examples.
    pub n_examples: usize,
    /// Decision threshold on the class-1 score, binary problems only.
    pub threshold: Option<f64>,
    /// Proportion of correct predictions.
    pub accuracy: f64,
    /// Unweighted mean of per-class precision.
    pub macro_precision: f64,
    /// Unweighted mean of per-class recall.
    pub macro_recall: f64,
    /// Unweighted mean of per-class F1.
    pub macro_f1: f64,
    /// Binary: AUC of the class-1 score. Multi-class: mean one-vs-rest AUC
    /// over classes with both positive and negative examples.
    pub roc_auc: f64,
    /// Precision-recall AUC, averaged the same way as `roc_auc`.
    pub pr_auc: f64,
    /// Per-class breakdown.
    pub classes: Vec<ClassMetrics>,
    /// Counts of true against predicted labels.
    pub confusion: ConfusionMatrix,
}

impl PerformanceReport {
    /// Score `scores` against the true `labels`.
    ///
    /// With two classes and a `threshold`, an example is predicted as class 1
    /// when its class-1 score is `>= threshold`; otherwise the most probable
    /// class is predicted.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::EmptyDataset`] | there are no examples |
    /// | [`RfError::LengthMismatch`] | `labels` and `scores` differ in length |
    /// | [`RfError::LabelOutOfRange`] | a label is `>= n_classes` |
    pub fn evaluate(
        scores: &ClassScores,
        labels: &[usize],
        threshold: Option<f64>,
    ) -> Result<Self, RfError> {
        if labels.len() != scores.n_examples() {
            return Err(RfError::LengthMismatch {
                expected: scores.n_examples(),
                got: labels.len(),
            });
        }
        let n_classes = scores.n_classes();
        let threshold = threshold.filter(|_| n_classes == 2);
        let predicted: Vec<usize> = match threshold {
            Some(t) => scores.class(1).iter().map(|&p| usize::from(p >= t)).collect(),
            None => scores.predicted_labels(),
        };

        let confusion = ConfusionMatrix::from_labels(labels, &predicted, n_classes)?;
        let classes = confusion.class_metrics();
        let mean = |f: fn(&ClassMetrics) -> f64| {
            ratio(classes.iter().map(f).sum::<f64>(), classes.len() as f64)
        };

        Ok(Self {
            n_examples: labels.len(),
            threshold,
            accuracy: confusion.accuracy(),
            macro_precision: mean(|m| m.precision),
            macro_recall: mean(|m| m.recall),
            macro_f1: mean(|m| m.f1),
            roc_auc: class_auc(scores, labels, roc_auc),
            pr_auc: class_auc(scores, labels, pr_auc),
            classes,
            confusion,
        })
    }
}

fn class_auc(scores: &ClassScores, labels: &[usize], area: fn(&[f64], &[bool]) -> f64) -> f64 {
    let n_classes = scores.n_classes();
    if n_classes == 2 {
        let positive: Vec<bool> = labels.iter().map(|&l| l == 1).collect();
        return area(scores.class(1), &positive);
    }
    let mut total = 0.0;
    let mut counted = 0usize;
    for class in 0..n_classes {
        let positive: Vec<bool> = labels.iter().map(|&l| l == class).collect();
        if positive.iter().all(|&p| p) || !positive.iter().any(|&p| p) {
            continue;
        }
        total += area(scores.class(class), &positive);
        counted += 1;
    }
    ratio(total, counted as f64)
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "examples:  {}", self.n_examples)?;
        if let Some(t) = self.threshold {
            writeln!(f, "threshold: {t:.3}")?;
        }
        writeln!(f, "accuracy:  {:.4}", self.accuracy)?;
        writeln!(f, "precision: {:.4}", self.macro_precision)?;
        writeln!(f, "recall:    {:.4}", self.macro_recall)?;
        writeln!(f, "f1:        {:.4}", self.macro_f1)?;
        writeln!(f, "roc_auc:   {:.4}", self.roc_auc)?;
        writeln!(f, "pr_auc:    {:.4}", self.pr_auc)?;
        writeln!(f)?;
        writeln!(f, "class  precision  recall  f1      support")?;
        for m in &self.classes {
            writeln!(
                f,
                "{:<6} {:<10.4} {:<7.4} {:<7.4} {}",
                m.class, m.precision, m.recall, m.f1, m.support
            )?;
        }
        writeln!(f)?;
        write!(f, "{}", self.confusion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- ConfusionMatrix ---

    #[test]
    fn diagonal_matrix_is_perfect() {
        let labels = [2, 0, 1, 2, 1, 0];
        let cm = ConfusionMatrix::from_labels(&labels, &labels, 3).unwrap();
        assert_eq!(cm.accuracy(), 1.0);
        assert!(cm.class_metrics().iter().all(|m| m.precision == 1.0 && m.f1 == 1.0));
        assert_eq!(cm.get(1, 0), 0);
    }

    #[test]
    fn mixed_predictions() {
        let truth = [0, 0, 1, 1, 1, 2, 2, 2];
        let guess = [0, 1, 1, 1, 0, 2, 2, 1];
        let cm = ConfusionMatrix::from_labels(&truth, &guess, 3).unwrap();
        let per_class = cm.class_metrics();
        assert!((per_class[0].precision - 0.5).abs() < 1e-12);
        assert!((per_class[0].recall - 0.5).abs() < 1e-12);
        assert_eq!(per_class[0].support, 2);
        assert!((per_class[2].recall - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(cm.get(1, 0), 1);
        assert!((cm.accuracy() - 5.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn zero_denominators_yield_zero() {
        // class 2 never occurs and is never predicted
        let cm = ConfusionMatrix::from_labels(&[0, 1], &[1, 1], 3).unwrap();
        let metrics = cm.class_metrics();
        assert_eq!(metrics[0].precision, 0.0);
        assert_eq!(metrics[2].recall, 0.0);
        assert_eq!(metrics[2].f1, 0.0);
        assert!(metrics.iter().all(|m| !m.f1.is_nan()));
    }

    #[test]
    fn input_validation() {
        assert!(matches!(
            ConfusionMatrix::from_labels(&[], &[], 2),
            Err(RfError::EmptyDataset)
        ));
        assert!(matches!(
            ConfusionMatrix::from_labels(&[0, 1], &[0], 2),
            Err(RfError::LengthMismatch { expected: 2, got: 1 })
        ));
        assert!(matches!(
            ConfusionMatrix::from_labels(&[0, 3], &[0, 1], 2),
            Err(RfError::LabelOutOfRange { example_index: 1, label: 3, .. })
        ));
    }

    #[test]
    fn display_formatting() {
        let cm = ConfusionMatrix::from_labels(&[0, 1], &[0, 1], 2).unwrap();
        let output = format!("{cm}");
        assert!(output.contains("pred_"));
        assert!(output.contains("true_"));
    }

    // --- ROC AUC ---

    #[test]
    fn auc_perfect_and_inverted() {
        let positive = [false, false, true, true];
        assert!((roc_auc(&[0.1, 0.2, 0.8, 0.9], &positive) - 1.0).abs() < 1e-10);
        assert!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &positive).abs() < 1e-10);
    }

    #[test]
    fn auc_ties_count_half() {
        let positive = [false, true];
        assert!((roc_auc(&[0.5, 0.5], &positive) - 0.5).abs() < 1e-10);
    }

    #[test]
    fn auc_known_value() {
        // pairs (pos, neg): (0.4>0.1) (0.4<0.6) (0.8>0.1) (0.8>0.6) → 3/4
        let positive = [false, true, false, true];
        assert!((roc_auc(&[0.1, 0.4, 0.6, 0.8], &positive) - 0.75).abs() < 1e-10);
    }

    #[test]
    fn auc_single_class_is_zero() {
        assert_eq!(roc_auc(&[0.1, 0.7], &[true, true]), 0.0);
        assert_eq!(roc_auc(&[], &[]), 0.0);
    }

    #[test]
    fn pr_auc_perfect_ranking() {
        let positive = [false, true, false, true];
        assert!((pr_auc(&[0.1, 0.9, 0.2, 0.8], &positive) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn pr_auc_known_value() {
        // descending: pos, neg, pos -> (0.5 * 1.0) + (0.5 * 2/3)
        let positive = [true, false, true];
        let expected = 0.5 + 0.5 * 2.0 / 3.0;
        assert!((pr_auc(&[0.9, 0.6, 0.3], &positive) - expected).abs() < 1e-10);
        assert_eq!(pr_auc(&[0.9, 0.6], &[false, false]), 0.0);
    }

    // --- PerformanceReport ---

    fn binary_scores(p1: &[f64]) -> ClassScores {
        let mut scores = ClassScores::zeros(p1.len(), 2);
        for (i, &p) in p1.iter().enumerate() {
            scores.add_example(i, &[1.0 - p, p]);
        }
        scores
    }

    #[test]
    fn threshold_changes_binary_predictions() {
        let scores = binary_scores(&[0.2, 0.4, 0.6, 0.9]);
        let labels = [0, 1, 1, 1];
        let argmax = PerformanceReport::evaluate(&scores, &labels, None).unwrap();
        assert!((argmax.accuracy - 0.75).abs() < 1e-10);
        let low = PerformanceReport::evaluate(&scores, &labels, Some(0.3)).unwrap();
        assert!((low.accuracy - 1.0).abs() < 1e-10);
        assert_eq!(low.threshold, Some(0.3));
        assert!((low.roc_auc - 1.0).abs() < 1e-10);
    }

    #[test]
    fn multiclass_ignores_threshold() {
        let mut scores = ClassScores::zeros(3, 3);
        scores.add_example(0, &[0.8, 0.1, 0.1]);
        scores.add_example(1, &[0.1, 0.8, 0.1]);
        scores.add_example(2, &[0.1, 0.1, 0.8]);
        let report = PerformanceReport::evaluate(&scores, &[0, 1, 2], Some(0.5)).unwrap();
        assert_eq!(report.threshold, None);
        assert!((report.macro_f1 - 1.0).abs() < 1e-10);
        assert!((report.roc_auc - 1.0).abs() < 1e-10);
        assert!(format!("{report}").contains("roc_auc"));
    }

    #[test]
    fn report_length_mismatch() {
        let scores = binary_scores(&[0.2, 0.4]);
        assert!(matches!(
            PerformanceReport::evaluate(&scores, &[0], None),
            Err(RfError::LengthMismatch { expected: 2, got: 1 })
        ));
    }
}
