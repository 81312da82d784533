use std::ops::Range;

use rand::Rng;

use crate::{
    criterion::Gini,
    dataset::{ColumnEntry, SparseColumnDataset},
    node::FeatureIndex,
};

/// A side weighing less than this is treated as empty.
const MIN_SIDE_WEIGHT: f64 = 1e-10;

/// Best split found for a node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SplitCandidate {
    pub(crate) feature: FeatureIndex,
    pub(crate) categorical: bool,
    pub(crate) threshold: f64,
    pub(crate) gain: f64,
    /// Weighted class frequency of the left child.
    pub(crate) left: Vec<f64>,
    /// Weighted class frequency of the right child.
    pub(crate) right: Vec<f64>,
}

/// Midpoint of `a < b` that stays strictly below `b`.
pub(crate) fn midpoint(a: f64, b: f64) -> f64 {
    let mid = a + (b - a) / 2.0;
    if mid >= b { a } else { mid }
}

/// Column range holding the stored entries of the child that does not
/// receive the implicit zeros, and whether the zeros go left.
pub(crate) fn listed_range(
    column: &[ColumnEntry],
    categorical: bool,
    threshold: f64,
) -> (Range<usize>, bool) {
    if categorical {
        if threshold == 0.0 {
            (0..column.len(), true)
        } else {
            let lo = column.partition_point(|e| e.value < threshold);
            let hi = column.partition_point(|e| e.value <= threshold);
            (lo..hi, false)
        }
    } else {
        let k = column.partition_point(|e| e.value <= threshold);
        if 0.0 <= threshold {
            (k..column.len(), true)
        } else {
            (0..k, false)
        }
    }
}

/// Find the highest-gain split over a random subset of candidate features.
///
/// The first `min(max_features, candidates.len())` slots of `candidates`
/// are drawn by a partial Fisher-Yates shuffle. Only examples with
/// `valid[i] > 0` take part. Returns `None` when no candidate has positive
/// gain with weight on both sides.
pub(crate) fn find_best_split(
    dataset: &SparseColumnDataset,
    labels: &[usize],
    valid: &[i32],
    node_frequency: &[f64],
    candidates: &mut [usize],
    max_features: usize,
    rng: &mut impl Rng,
) -> Option<SplitCandidate> {
    let take = max_features.min(candidates.len());
    for i in 0..take {
        let j = rng.gen_range(i..candidates.len());
        candidates.swap(i, j);
    }

    let n_classes = dataset.n_classes();
    let mut scanner = Scanner {
        labels,
        weights: dataset.class_weight(),
        valid,
        node_frequency,
        criterion: Gini::new(node_frequency),
        left: vec![0.0; n_classes],
        right: vec![0.0; n_classes],
        nonzero: vec![0.0; n_classes],
        zero: vec![0.0; n_classes],
        best: None,
    };

    for &feature in &candidates[..take] {
        let column = dataset.column(feature);
        let feature = FeatureIndex::new(feature);
        if dataset.is_categorical(feature.index()) {
            scanner.scan_categorical(feature, column);
        } else {
            scanner.scan_continuous(feature, column);
        }
    }

    scanner.best
}

struct Scanner<'a> {
    labels: &'a [usize],
    weights: &'a [f64],
    valid: &'a [i32],
    node_frequency: &'a [f64],
    criterion: Gini,
    left: Vec<f64>,
    right: Vec<f64>,
    nonzero: Vec<f64>,
    zero: Vec<f64>,
    best: Option<SplitCandidate>,
}

/// Stored entries of `column` whose example is active at the current node.
fn active<'c>(
    valid: &'c [i32],
    column: &'c [ColumnEntry],
) -> impl Iterator<Item = &'c ColumnEntry> {
    column.iter().filter(move |e| valid[e.example] > 0)
}

impl Scanner<'_> {
    /// Fill `nonzero` with the active listed mass and `zero` with the rest
    /// of the node. Returns `false` if no listed entry is active.
    fn split_mass(&mut self, column: &[ColumnEntry]) -> bool {
        self.nonzero.fill(0.0);
        let mut any = false;
        for entry in active(self.valid, column) {
            let label = self.labels[entry.example];
            self.nonzero[label] += self.weights[label];
            any = true;
        }
        for ((z, &n), &nz) in self.zero.iter_mut().zip(self.node_frequency).zip(&self.nonzero) {
            *z = (n - nz).max(0.0);
        }
        any
    }

    fn add_to_left(&mut self, label: usize) {
        self.left[label] += self.weights[label];
    }

    fn add_zero_to_left(&mut self) {
        for (l, &z) in self.left.iter_mut().zip(&self.zero) {
            *l += z;
        }
    }

    fn scan_continuous(&mut self, feature: FeatureIndex, column: &[ColumnEntry]) {
        if !self.split_mass(column) {
            return;
        }
        self.left.fill(0.0);

        let mut entries = active(self.valid, column);
        let Some(first) = entries.next() else {
            return;
        };

        if first.value > 0.0 {
            self.add_zero_to_left();
            self.offer(feature, false, midpoint(0.0, first.value), None);
        }

        let mut prev = *first;
        for &cur in entries {
            let prev_label = self.labels[prev.example];
            self.add_to_left(prev_label);
            if prev.value < 0.0 && cur.value > 0.0 {
                self.offer(feature, false, midpoint(prev.value, 0.0), None);
                self.add_zero_to_left();
                self.offer(feature, false, midpoint(0.0, cur.value), None);
            } else if prev.value != cur.value && prev_label != self.labels[cur.example] {
                self.offer(feature, false, midpoint(prev.value, cur.value), None);
            }
            prev = cur;
        }

        if prev.value < 0.0 {
            let prev_label = self.labels[prev.example];
            self.add_to_left(prev_label);
            self.offer(feature, false, midpoint(prev.value, 0.0), None);
        }
    }

    fn scan_categorical(&mut self, feature: FeatureIndex, column: &[ColumnEntry]) {
        if !self.split_mass(column) {
            return;
        }
        let zero = self.zero.clone();
        self.offer(feature, true, 0.0, Some(&zero));

        let entries: Vec<ColumnEntry> = active(self.valid, column).copied().collect();
        for group in entries.chunk_by(|a, b| a.value == b.value) {
            self.left.fill(0.0);
            for entry in group {
                self.add_to_left(self.labels[entry.example]);
            }
            self.offer(feature, true, group[0].value, None);
        }
    }

    /// Score `left` (or the running left buffer) against the rest of the node.
    fn offer(
        &mut self,
        feature: FeatureIndex,
        categorical: bool,
        threshold: f64,
        left: Option<&[f64]>,
    ) {
        let left = left.unwrap_or(&self.left);
        for ((r, &n), &l) in self.right.iter_mut().zip(self.node_frequency).zip(left) {
            *r = (n - l).max(0.0);
        }
        let left_total: f64 = left.iter().sum();
        let right_total: f64 = self.right.iter().sum();
        if left_total <= MIN_SIDE_WEIGHT || right_total <= MIN_SIDE_WEIGHT {
            return;
        }

        let gain = self.criterion.gain(left, &self.right);
        let best_gain = self.best.as_ref().map_or(0.0, |b| b.gain);
        if gain > best_gain {
            self.best = Some(SplitCandidate {
                feature,
                categorical,
                threshold,
                gain,
                left: left.to_vec(),
                right: self.right.clone(),
            });
        }
    }
}
