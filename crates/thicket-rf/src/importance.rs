//! Feature importance aggregation across trees.

use std::sync::OnceLock;

use crate::{forest::RandomForest, node::FeatureIndex};

/// A ranked feature with its importance score and rank.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RankedFeature {
    /// Zero-based feature id.
    pub feature: FeatureIndex,
    /// Mean normalized importance across trees.
    pub importance: f64,
    /// 1-based rank (1 = most important).
    pub rank: usize,
}

impl RandomForest {
    /// Mean of the per-tree importances, one entry per feature.
    ///
    /// Computed on first use and cached. Every tree counts, so a single-leaf
    /// tree contributes zeros: the sum is 1.0 only when every tree splits,
    /// and falls to the fraction of splitting trees otherwise.
    #[must_use]
    pub fn feature_importances(&self) -> &[f64] {
        self.importance.get_or_init(|| self.aggregate_importances())
    }

    /// Recompute every tree's importances and the forest mean.
    pub fn recompute_importances(&mut self) -> &[f64] {
        for tree in &mut self.trees {
            tree.recompute_importances();
        }
        self.importance = OnceLock::new();
        self.feature_importances()
    }

    /// Features sorted by descending importance with 1-based ranks.
    ///
    /// Ties keep ascending feature order. `top_n` truncates the list.
    #[must_use]
    pub fn ranked_importances(&self, top_n: Option<usize>) -> Vec<RankedFeature> {
        rank_importances(self.feature_importances(), top_n)
    }

    fn aggregate_importances(&self) -> Vec<f64> {
        let mut totals = vec![0.0f64; self.n_features];
        for tree in &self.trees {
            for (total, &value) in totals.iter_mut().zip(tree.feature_importances()) {
                *total += value;
            }
        }
        let n = self.trees.len().max(1) as f64;
        totals.iter_mut().for_each(|v| *v /= n);
        totals
    }
}

/// Sort importances descending and assign 1-based ranks.
pub(crate) fn rank_importances(importances: &[f64], top_n: Option<usize>) -> Vec<RankedFeature> {
    let mut features: Vec<RankedFeature> = importances
        .iter()
        .enumerate()
        .map(|(i, &importance)| RankedFeature {
            feature: FeatureIndex::new(i),
            importance,
            rank: 0, // will be set after sorting
        })
        .collect();

    features.sort_by(|a, b| b.importance.total_cmp(&a.importance));

    for (i, feat) in features.iter_mut().enumerate() {
        feat.rank = i + 1;
    }
    if let Some(n) = top_n {
        features.truncate(n);
    }
    features
}
