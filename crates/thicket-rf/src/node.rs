//! Arena node types shared by tree growth, prediction and persistence.

use std::fmt;

/// Column of the dataset a split tests, counted from zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FeatureIndex(usize);

impl FeatureIndex {
    pub(crate) fn new(feature: usize) -> Self {
        Self(feature)
    }

    /// Zero-based column id; add one for the libsvm id.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FeatureIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Position of a node inside [`DecisionTree`](crate::DecisionTree)'s node vector.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub(crate) fn new(slot: usize) -> Self {
        Self(slot)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entry of a tree's node vector.
///
/// Children are [`NodeIndex`] slots in the same vector. Leaves also know their
/// slot in the tree's leaf table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Node {
    /// Routes an example to `left` or `right` by one feature value.
    Split {
        /// Tested column.
        feature: FeatureIndex,
        /// Equality split (`value == threshold` goes left) instead of `value <= threshold`.
        categorical: bool,
        /// Split threshold. The implicit value of an unlisted feature is `0.0`.
        threshold: f64,
        /// Gini gain of this split.
        gain: f64,
        /// Child for values that pass the test.
        left: NodeIndex,
        /// Child for every other value.
        right: NodeIndex,
        /// Weighted class frequency that reached this node. Empty for trees
        /// restored from a node dump, which does not record it.
        frequency: Vec<f64>,
        /// Number of training examples that reached this node (0 when restored from a dump).
        n_samples: usize,
    },
    /// A terminal leaf node.
    Leaf {
        /// Position of this leaf in the tree's leaf table.
        leaf_index: usize,
        /// `frequency` scaled to sum to one.
        distribution: Vec<f64>,
        /// Weighted class frequency that reached this leaf.
        frequency: Vec<f64>,
        /// Number of training examples in this leaf (0 when restored from a dump).
        n_samples: usize,
    },
}

impl Node {
    /// Return the number of training examples that reached this node.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        match self {
            Node::Split { n_samples, .. } | Node::Leaf { n_samples, .. } => *n_samples,
        }
    }

    /// Return the weighted class frequency recorded at this node.
    #[must_use]
    pub fn frequency(&self) -> &[f64] {
        match self {
            Node::Split { frequency, .. } | Node::Leaf { frequency, .. } => frequency,
        }
    }

    /// `true` for [`Node::Leaf`].
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// `true` when `value` is routed to the left child of a split.
pub(crate) fn goes_left(categorical: bool, threshold: f64, value: f64) -> bool {
    if categorical {
        value == threshold
    } else {
        value <= threshold
    }
}

/// Normalize a frequency vector into a distribution. A weightless vector stays all zeros.
pub(crate) fn normalize(frequency: &[f64]) -> Vec<f64> {
    let total: f64 = frequency.iter().sum();
    if total > 0.0 {
        frequency.iter().map(|&f| f / total).collect()
    } else {
        vec![0.0; frequency.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> Node {
        Node::Leaf {
            leaf_index: 0,
            distribution: vec![0.2, 0.8],
            frequency: vec![1.0, 4.0],
            n_samples: 5,
        }
    }

    fn split() -> Node {
        Node::Split {
            feature: FeatureIndex::new(2),
            categorical: false,
            threshold: 3.5,
            gain: 0.16,
            left: NodeIndex::new(1),
            right: NodeIndex::new(2),
            frequency: vec![5.0, 5.0],
            n_samples: 10,
        }
    }

    // --- Indices ---

    #[test]
    fn indices_display() {
        assert_eq!(FeatureIndex::new(3).to_string(), "3");
        assert_eq!(NodeIndex::new(12).to_string(), "#12");
        assert!(NodeIndex::new(1) < NodeIndex::new(2));
    }

    // --- Node accessors ---

    #[test]
    fn accessors_cover_both_variants() {
        assert!(leaf().is_leaf());
        assert!(!split().is_leaf());
        assert_eq!(leaf().n_samples(), 5);
        assert_eq!(split().n_samples(), 10);
        assert_eq!(leaf().frequency(), &[1.0, 4.0]);
        assert_eq!(split().frequency(), &[5.0, 5.0]);
    }

    // --- Routing ---

    #[test]
    fn continuous_routing_is_inclusive() {
        assert!(goes_left(false, 1.5, 1.5));
        assert!(goes_left(false, 1.5, 0.0));
        assert!(!goes_left(false, -0.5, 0.0));
    }

    #[test]
    fn categorical_routing_is_equality() {
        assert!(goes_left(true, 2.0, 2.0));
        assert!(!goes_left(true, 2.0, 1.0));
        assert!(goes_left(true, 0.0, 0.0));
    }

    #[test]
    fn normalize_weightless_stays_zero() {
        let d = normalize(&[1.0, 3.0]);
        assert!((d[0] - 0.25).abs() < 1e-10);
        assert!((d[1] - 0.75).abs() < 1e-10);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
