//! Random Forest training with block-parallel tree construction.

use std::sync::OnceLock;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, info, instrument};

use crate::{
    config::{MaxFeatures, RandomForestConfig},
    dataset::SparseColumnDataset,
    error::RfError,
    parallel::{block_ranges, thread_pool},
    tree::{DecisionTree, DecisionTreeConfig},
};

/// A fitted Random Forest ensemble.
///
/// Only obtainable from a completed training run or a successful load.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RandomForest {
    pub(crate) trees: Vec<DecisionTree>,
    pub(crate) n_threads: usize,
    pub(crate) n_features: usize,
    pub(crate) n_classes: usize,
    #[serde(skip)]
    pub(crate) importance: OnceLock<Vec<f64>>,
}

impl RandomForest {
    pub(crate) fn from_trees(
        trees: Vec<DecisionTree>,
        n_threads: usize,
        n_features: usize,
        n_classes: usize,
    ) -> Self {
        Self {
            trees,
            n_threads,
            n_features,
            n_classes,
            importance: OnceLock::new(),
        }
    }

    /// Return the number of features this forest was trained on.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Return the number of trees in the ensemble.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Return the number of worker threads used by prediction.
    #[must_use]
    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Change the number of worker threads used by prediction.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidThreadCount`] if `n_threads` is zero.
    pub fn set_n_threads(&mut self, n_threads: usize) -> Result<(), RfError> {
        if n_threads == 0 {
            return Err(RfError::InvalidThreadCount { n_threads });
        }
        self.n_threads = n_threads;
        Ok(())
    }

    /// Return the trees in build order.
    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

/// Train the Random Forest ensemble.
///
/// Per-tree seeds are drawn up front from the master seed, so the result
/// does not depend on `n_threads`.
#[instrument(skip_all, fields(n_trees = config.n_trees, n_examples = dataset.n_examples()))]
pub(crate) fn train(
    config: &RandomForestConfig,
    dataset: &SparseColumnDataset,
) -> Result<RandomForest, RfError> {
    // --- Validate config ---
    if config.n_threads == 0 {
        return Err(RfError::InvalidThreadCount {
            n_threads: config.n_threads,
        });
    }
    if let Some(d) = config.max_depth
        && d == 0
    {
        return Err(RfError::InvalidMaxDepth { max_depth: 0 });
    }
    if config.min_split == 0 {
        return Err(RfError::InvalidMinSplit { min_split: 0 });
    }
    if dataset.labels().is_none() {
        return Err(RfError::UnlabeledDataset);
    }
    let max_features_resolved = config.max_features.resolve(dataset.n_features())?;

    info!(
        n_trees = config.n_trees,
        n_threads = config.n_threads,
        n_examples = dataset.n_examples(),
        n_features = dataset.n_features(),
        n_classes = dataset.n_classes(),
        max_features = max_features_resolved,
        "training random forest"
    );

    // Generate per-tree seeds from master RNG.
    let mut master_rng = ChaCha8Rng::seed_from_u64(config.seed);
    let tree_seeds: Vec<u64> = (0..config.n_trees).map(|_| master_rng.r#gen()).collect();

    let tree_config = DecisionTreeConfig::new()
        .with_max_features(MaxFeatures::Fixed(max_features_resolved))
        .with_max_depth(config.max_depth)
        .with_min_split(config.min_split);

    let pool = thread_pool(config.n_threads)?;
    let blocks = block_ranges(config.n_trees, config.n_threads);
    let per_block = pool.install(|| {
        blocks
            .into_par_iter()
            .map(|range| {
                tree_seeds[range]
                    .iter()
                    .map(|&seed| tree_config.clone().with_seed(seed).fit(dataset))
                    .collect::<Result<Vec<_>, RfError>>()
            })
            .collect::<Result<Vec<_>, RfError>>()
    })?;
    let trees: Vec<DecisionTree> = per_block.into_iter().flatten().collect();

    debug!(
        n_trees_trained = trees.len(),
        total_nodes = trees.iter().map(DecisionTree::n_nodes).sum::<usize>(),
        "tree training complete"
    );

    Ok(RandomForest::from_trees(
        trees,
        config.n_threads,
        dataset.n_features(),
        dataset.n_classes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example::SparseExample;

    /// Three classes separated on feature 0, with noise features.
    fn make_separable_data() -> Vec<SparseExample> {
        let mut examples = Vec::new();
        for class in 0..3 {
            for i in 0..20 {
                let mut ex = SparseExample::labeled(class);
                ex.push(0, class as f64 * 10.0 + 1.0 + i as f64 * 0.15);
                ex.push(1, ((i * 7) % 5) as f64 - 2.0);
                if i % 3 == 0 {
                    ex.push(2, 1.0 + (i % 4) as f64);
                }
                examples.push(ex);
            }
        }
        examples
    }

    #[test]
    fn three_class_separable_accuracy() {
        let examples = make_separable_data();
        let ds = SparseColumnDataset::build(&examples, 3, 3, None).unwrap();
        let forest = RandomForestConfig::new(20)
            .unwrap()
            .with_max_features(MaxFeatures::All)
            .fit(&ds)
            .unwrap();

        let predictions = forest.predict_label(&examples).unwrap();
        let correct = predictions
            .iter()
            .zip(&examples)
            .filter(|&(&p, ex)| Some(p) == ex.label())
            .count();
        let accuracy = correct as f64 / examples.len() as f64;
        assert!(accuracy > 0.95, "accuracy = {accuracy}");
    }

    #[test]
    fn thread_count_does_not_change_trees() {
        let examples = make_separable_data();
        let ds = SparseColumnDataset::build(&examples, 3, 3, None).unwrap();
        let single = RandomForestConfig::new(7).unwrap().with_seed(99).fit(&ds).unwrap();
        let multi = RandomForestConfig::new(7)
            .unwrap()
            .with_seed(99)
            .with_n_threads(3)
            .fit(&ds)
            .unwrap();
        assert_eq!(single.n_trees(), multi.n_trees());
        for (a, b) in single.trees().iter().zip(multi.trees()) {
            assert_eq!(a.nodes(), b.nodes());
        }
    }

    #[test]
    fn proba_rows_sum_to_one() {
        let examples = make_separable_data();
        let ds = SparseColumnDataset::build(&examples, 3, 3, None).unwrap();
        let forest = RandomForestConfig::new(5)
            .unwrap()
            .with_n_threads(2)
            .fit(&ds)
            .unwrap();
        let proba = forest.predict_proba(&examples).unwrap();
        for i in 0..examples.len() {
            let sum: f64 = proba.example(i).iter().sum();
            assert!((sum - 1.0).abs() < 1e-10, "row {i} sums to {sum}");
        }
    }

    #[test]
    fn apply_is_tree_major() {
        let examples = make_separable_data();
        let ds = SparseColumnDataset::build(&examples, 3, 3, None).unwrap();
        let forest = RandomForestConfig::new(4)
            .unwrap()
            .with_n_threads(3)
            .fit(&ds)
            .unwrap();
        let leaves = forest.apply(&examples).unwrap();
        assert_eq!(leaves.len(), 4);
        for (tree, per_tree) in forest.trees().iter().zip(&leaves) {
            assert_eq!(per_tree, &tree.apply(&examples).unwrap());
        }
    }

    #[test]
    fn invalid_config_errors() {
        let ds = SparseColumnDataset::build(&make_separable_data(), 3, 3, None).unwrap();
        let base = RandomForestConfig::new(2).unwrap();
        assert!(matches!(
            base.clone().with_n_threads(0).fit(&ds),
            Err(RfError::InvalidThreadCount { n_threads: 0 })
        ));
        assert!(matches!(
            base.clone().with_min_split(0).fit(&ds),
            Err(RfError::InvalidMinSplit { .. })
        ));
        assert!(matches!(
            base.clone().with_max_depth(Some(0)).fit(&ds),
            Err(RfError::InvalidMaxDepth { .. })
        ));
        assert!(matches!(
            base.with_max_features(MaxFeatures::Fraction(2.0)).fit(&ds),
            Err(RfError::InvalidMaxFeatures { .. })
        ));
    }

    #[test]
    fn set_n_threads_validates() {
        let ds = SparseColumnDataset::build(&make_separable_data(), 3, 3, None).unwrap();
        let mut forest = RandomForestConfig::new(2).unwrap().fit(&ds).unwrap();
        assert!(forest.set_n_threads(0).is_err());
        forest.set_n_threads(4).unwrap();
        assert_eq!(forest.n_threads(), 4);
    }
}
