//! Prediction methods for the Random Forest ensemble.

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, instrument};

use crate::{
    error::RfError,
    example::SparseExample,
    forest::RandomForest,
    parallel::{block_ranges, thread_pool},
    tree::DecisionTree,
};

/// Per-example class scores in class-major layout.
///
/// All example scores for class 0 come first, then class 1, and so on.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ClassScores {
    n_examples: usize,
    n_classes: usize,
    values: Vec<f64>,
}

impl ClassScores {
    pub(crate) fn zeros(n_examples: usize, n_classes: usize) -> Self {
        Self {
            n_examples,
            n_classes,
            values: vec![0.0; n_examples * n_classes],
        }
    }

    /// Build scores from one distribution per example.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::LengthMismatch`] if a row does not have
    /// `n_classes` entries.
    pub fn from_rows(n_classes: usize, rows: &[Vec<f64>]) -> Result<Self, RfError> {
        let mut scores = Self::zeros(rows.len(), n_classes);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_classes {
                return Err(RfError::LengthMismatch {
                    expected: n_classes,
                    got: row.len(),
                });
            }
            scores.add_example(i, row);
        }
        Ok(scores)
    }

    /// Return the number of scored examples.
    #[must_use]
    pub fn n_examples(&self) -> usize {
        self.n_examples
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Return `true` if no example was scored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_examples == 0
    }

    /// Return the score of `class` for `example`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    #[must_use]
    pub fn get(&self, example: usize, class: usize) -> f64 {
        assert!(example < self.n_examples, "example {example} out of range");
        self.values[class * self.n_examples + example]
    }

    /// Return the scores of every example for `class`.
    #[must_use]
    pub fn class(&self, class: usize) -> &[f64] {
        &self.values[class * self.n_examples..(class + 1) * self.n_examples]
    }

    /// Return the class distribution of one example.
    #[must_use]
    pub fn example(&self, example: usize) -> Vec<f64> {
        (0..self.n_classes).map(|c| self.get(example, c)).collect()
    }

    /// Return the most probable class of `example` (lowest index on ties).
    #[must_use]
    pub fn predicted_class(&self, example: usize) -> usize {
        let mut best = 0;
        for class in 1..self.n_classes {
            if self.get(example, class) > self.get(example, best) {
                best = class;
            }
        }
        best
    }

    /// Return the most probable class of every example.
    #[must_use]
    pub fn predicted_labels(&self) -> Vec<usize> {
        (0..self.n_examples).map(|i| self.predicted_class(i)).collect()
    }

    /// Return the top-k classes of `example` sorted by descending score.
    #[must_use]
    pub fn top_k(&self, example: usize, k: usize) -> Vec<(usize, f64)> {
        let mut indexed: Vec<(usize, f64)> =
            self.example(example).into_iter().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
        indexed.truncate(k);
        indexed
    }

    /// Return the raw class-major buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub(crate) fn add_example(&mut self, example: usize, distribution: &[f64]) {
        for (class, &p) in distribution.iter().enumerate() {
            self.values[class * self.n_examples + example] += p;
        }
    }

    pub(crate) fn merge(&mut self, other: &ClassScores) {
        for (v, &o) in self.values.iter_mut().zip(&other.values) {
            *v += o;
        }
    }

    pub(crate) fn scale(&mut self, factor: f64) {
        self.values.iter_mut().for_each(|v| *v *= factor);
    }
}

/// Reused zero-filled dense vector that one sparse example is scattered into.
pub(crate) struct DenseScratch {
    values: Vec<f64>,
}

impl DenseScratch {
    pub(crate) fn new(n_features: usize) -> Self {
        Self {
            values: vec![0.0; n_features],
        }
    }

    /// Scatter `example`, validating its feature ids first.
    pub(crate) fn load(
        &mut self,
        example: &SparseExample,
        example_index: usize,
    ) -> Result<&[f64], RfError> {
        let n_features = self.values.len();
        if let Some(&(feature, _)) = example.entries().iter().find(|(f, _)| *f >= n_features) {
            return Err(RfError::FeatureOutOfRange {
                example_index,
                feature,
                n_features,
            });
        }
        for &(feature, value) in example.entries() {
            self.values[feature] = value;
        }
        Ok(&self.values)
    }

    /// Reset the entries written by [`DenseScratch::load`].
    pub(crate) fn clear(&mut self, example: &SparseExample) {
        for &(feature, _) in example.entries() {
            self.values[feature] = 0.0;
        }
    }
}

impl RandomForest {
    /// Return the class distribution of each example averaged over all trees.
    ///
    /// Tree blocks are evaluated in parallel, each into its own partial
    /// buffer; the buffers are summed after every worker has finished.
    ///
    /// # Errors
    ///
    /// | Variant                        | When                                        |
    /// |--------------------------------|---------------------------------------------|
    /// | [`RfError::FeatureOutOfRange`] | an example references a feature `>= n_features` |
    /// | [`RfError::ThreadPool`]        | the worker pool cannot be created           |
    #[instrument(skip_all, fields(n_examples = examples.len(), n_trees = self.trees.len()))]
    pub fn predict_proba(&self, examples: &[SparseExample]) -> Result<ClassScores, RfError> {
        let mut scores = ClassScores::zeros(examples.len(), self.n_classes);
        if examples.is_empty() {
            return Ok(scores);
        }

        let pool = thread_pool(self.n_threads)?;
        let blocks = block_ranges(self.trees.len(), self.n_threads);
        let partials = pool.install(|| {
            blocks
                .into_par_iter()
                .map(|range| {
                    block_proba(&self.trees[range], examples, self.n_features, self.n_classes)
                })
                .collect::<Result<Vec<ClassScores>, RfError>>()
        })?;

        for partial in &partials {
            scores.merge(partial);
        }
        scores.scale(1.0 / self.trees.len() as f64);
        debug!(n_blocks = partials.len(), "forest prediction complete");
        Ok(scores)
    }

    /// Return the most probable class of each example (lowest index on ties).
    ///
    /// # Errors
    ///
    /// Same as [`RandomForest::predict_proba`].
    pub fn predict_label(&self, examples: &[SparseExample]) -> Result<Vec<usize>, RfError> {
        Ok(self.predict_proba(examples)?.predicted_labels())
    }

    /// Return the leaf index reached in every tree, tree-major:
    /// `result[tree][example]`.
    ///
    /// # Errors
    ///
    /// Same as [`RandomForest::predict_proba`].
    #[instrument(skip_all, fields(n_examples = examples.len(), n_trees = self.trees.len()))]
    pub fn apply(&self, examples: &[SparseExample]) -> Result<Vec<Vec<usize>>, RfError> {
        let pool = thread_pool(self.n_threads)?;
        let blocks = block_ranges(self.trees.len(), self.n_threads);
        let per_block = pool.install(|| {
            blocks
                .into_par_iter()
                .map(|range| {
                    self.trees[range]
                        .iter()
                        .map(|tree| tree.apply(examples))
                        .collect::<Result<Vec<_>, RfError>>()
                })
                .collect::<Result<Vec<_>, RfError>>()
        })?;
        Ok(per_block.into_iter().flatten().collect())
    }
}

/// Sum the leaf distributions of `trees` for every example.
fn block_proba(
    trees: &[DecisionTree],
    examples: &[SparseExample],
    n_features: usize,
    n_classes: usize,
) -> Result<ClassScores, RfError> {
    let mut partial = ClassScores::zeros(examples.len(), n_classes);
    let mut scratch = DenseScratch::new(n_features);
    for (example_index, example) in examples.iter().enumerate() {
        let dense = scratch.load(example, example_index)?;
        for tree in trees {
            partial.add_example(example_index, tree.distribution(dense));
        }
        scratch.clear(example);
    }
    Ok(partial)
}
