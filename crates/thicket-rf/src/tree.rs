use std::{ops::Range, sync::OnceLock};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, instrument};

use crate::{
    RfError,
    config::MaxFeatures,
    dataset::{ColumnEntry, SparseColumnDataset},
    example::SparseExample,
    node::{FeatureIndex, Node, NodeIndex, goes_left, normalize},
    predict::{ClassScores, DenseScratch},
    split::{find_best_split, listed_range},
};

/// A class counts as present at a node when its frequency exceeds this.
const PRESENT_FREQUENCY: f64 = 1e-5;

/// Configuration for a single decision tree.
///
/// Construct via [`DecisionTreeConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter      | Default             |
/// |----------------|---------------------|
/// | `max_features` | `All`               |
/// | `max_depth`    | `None` (unlimited)  |
/// | `min_split`    | 1                   |
/// | `seed`         | 42                  |
#[derive(Debug, Clone)]
pub struct DecisionTreeConfig {
    pub(crate) max_features: MaxFeatures,
    pub(crate) max_depth: Option<usize>,
    pub(crate) min_split: usize,
    pub(crate) seed: u64,
}

impl DecisionTreeConfig {
    /// Create a new config with default values.
    ///
    /// All parameters use the defaults shown in the struct-level documentation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_features: MaxFeatures::All,
            max_depth: None,
            min_split: 1,
            seed: 42,
        }
    }

    /// Set the rule for the number of candidate features drawn per node.
    #[must_use]
    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    /// Set the maximum tree depth.
    ///
    /// `None` means grow until leaves are pure or no split helps. `Some(d)`
    /// turns every node at depth `d` into a leaf (root is depth 0).
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the sample count at or below which a node becomes a leaf.
    #[must_use]
    pub fn with_min_split(mut self, min_split: usize) -> Self {
        self.min_split = min_split;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // --- Getters ---

    /// Return the max features rule.
    #[must_use]
    pub fn max_features(&self) -> MaxFeatures {
        self.max_features
    }

    /// Return the maximum depth limit, if any.
    #[must_use]
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Return the leaf sample-count bound.
    #[must_use]
    pub fn min_split(&self) -> usize {
        self.min_split
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Grow a decision tree on a labeled column-major dataset.
    ///
    /// Every example takes part; trees of a forest differ only through the
    /// candidate features drawn at each node.
    ///
    /// # Errors
    ///
    /// | Variant                         | When                                     |
    /// |---------------------------------|------------------------------------------|
    /// | [`RfError::InvalidMaxDepth`]    | `max_depth` is `Some(0)`                 |
    /// | [`RfError::InvalidMinSplit`]    | `min_split` is zero                      |
    /// | [`RfError::InvalidMaxFeatures`] | the max-features rule cannot be resolved |
    /// | [`RfError::UnlabeledDataset`]   | the dataset was built without labels     |
    #[instrument(skip(self, dataset), fields(n_examples = dataset.n_examples(), seed = self.seed))]
    pub fn fit(&self, dataset: &SparseColumnDataset) -> Result<DecisionTree, RfError> {
        if let Some(d) = self.max_depth
            && d == 0
        {
            return Err(RfError::InvalidMaxDepth { max_depth: 0 });
        }
        if self.min_split == 0 {
            return Err(RfError::InvalidMinSplit { min_split: 0 });
        }
        let labels = dataset.labels().ok_or(RfError::UnlabeledDataset)?;
        let max_features = self.max_features.resolve(dataset.n_features())?;

        let mut builder = TreeBuilder {
            dataset,
            labels,
            max_depth: self.max_depth,
            min_split: self.min_split,
            max_features,
            valid: vec![1; dataset.n_examples()],
            candidates: dataset.valid_features().to_vec(),
            rng: ChaCha8Rng::seed_from_u64(self.seed),
            nodes: Vec::new(),
            leaves: Vec::new(),
        };
        builder.grow(dataset.class_frequency(labels));

        #[cfg(test)]
        assert!(
            builder.valid.iter().all(|&v| v == 1),
            "valid counters not restored after build"
        );

        debug!(
            n_nodes = builder.nodes.len(),
            n_leaves = builder.leaves.len(),
            max_features,
            "decision tree built"
        );

        Ok(DecisionTree {
            nodes: builder.nodes,
            leaves: builder.leaves,
            n_features: dataset.n_features(),
            n_classes: dataset.n_classes(),
            max_features,
            importance: OnceLock::new(),
        })
    }
}

impl Default for DecisionTreeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Growth state for one tree.
///
/// `valid[i] == 1` exactly when example `i` reaches the node being grown;
/// inactive examples hold values `<= 0`. Closing a split restores the array
/// to its state before the split was opened.
struct TreeBuilder<'a> {
    dataset: &'a SparseColumnDataset,
    labels: &'a [usize],
    max_depth: Option<usize>,
    min_split: usize,
    max_features: usize,
    valid: Vec<i32>,
    candidates: Vec<usize>,
    rng: ChaCha8Rng,
    nodes: Vec<Node>,
    leaves: Vec<NodeIndex>,
}

/// A split node whose children are still being grown.
///
/// While the zero child grows the listed range is shifted by -1; while the
/// listed child grows it is shifted by +1 and everything else by -1.
struct OpenSplit {
    node_idx: usize,
    feature: FeatureIndex,
    categorical: bool,
    threshold: f64,
    gain: f64,
    frequency: Vec<f64>,
    n_samples: usize,
    depth: usize,
    listed: Range<usize>,
    zeros_left: bool,
    listed_frequency: Vec<f64>,
    zero_child: Option<NodeIndex>,
    #[cfg(test)]
    before: Vec<i32>,
}

enum Opened {
    Leaf(NodeIndex),
    /// The split and the frequency of its zero child, which grows next.
    Split(OpenSplit, Vec<f64>),
}

impl TreeBuilder<'_> {
    /// Grow the tree depth-first, zero child before listed child, with an
    /// explicit stack of open splits so depth is bounded by the heap only.
    fn grow(&mut self, root_frequency: Vec<f64>) -> NodeIndex {
        let mut open_splits: Vec<OpenSplit> = Vec::new();
        let mut pending = (root_frequency, 0usize);
        loop {
            let (frequency, depth) = pending;
            let mut finished = match self.open(frequency, depth) {
                Opened::Split(split, zero_frequency) => {
                    pending = (zero_frequency, depth + 1);
                    open_splits.push(split);
                    continue;
                }
                Opened::Leaf(idx) => idx,
            };

            loop {
                let zero_child = match open_splits.last_mut() {
                    None => return finished,
                    Some(parent) => match parent.zero_child {
                        Some(zero_child) => zero_child,
                        None => {
                            parent.zero_child = Some(finished);
                            let dataset = self.dataset;
                            let column = dataset.column(parent.feature.index());
                            self.shift_range(column, parent.listed.clone(), 2);
                            self.shift_all(-1);
                            pending = (
                                std::mem::take(&mut parent.listed_frequency),
                                parent.depth + 1,
                            );
                            break;
                        }
                    },
                };
                if let Some(parent) = open_splits.pop() {
                    finished = self.close(parent, zero_child, finished);
                }
            }
        }
    }

    /// Turn a node into a leaf, or reserve its slot and enter its zero child.
    fn open(&mut self, frequency: Vec<f64>, depth: usize) -> Opened {
        let n_samples = self.effective_count(&frequency);

        #[cfg(test)]
        self.check_partition(n_samples);

        let depth_reached = self.max_depth.is_some_and(|max_d| depth >= max_d);
        let n_present = frequency.iter().filter(|&&f| f > PRESENT_FREQUENCY).count();
        if depth_reached || n_present < 2 || n_samples <= self.min_split {
            return Opened::Leaf(self.make_leaf(frequency, n_samples));
        }

        let Some(split) = find_best_split(
            self.dataset,
            self.labels,
            &self.valid,
            &frequency,
            &mut self.candidates,
            self.max_features,
            &mut self.rng,
        ) else {
            return Opened::Leaf(self.make_leaf(frequency, n_samples));
        };

        #[cfg(test)]
        let before = self.valid.clone();

        let dataset = self.dataset;
        let column = dataset.column(split.feature.index());
        let (listed, zeros_left) = listed_range(column, split.categorical, split.threshold);
        let (zero_frequency, listed_frequency) = if zeros_left {
            (split.left, split.right)
        } else {
            (split.right, split.left)
        };

        // reserved now, overwritten with the split once both children exist
        let node_idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            leaf_index: 0,
            distribution: Vec::new(),
            frequency: Vec::new(),
            n_samples,
        });
        self.shift_range(column, listed.clone(), -1);

        Opened::Split(
            OpenSplit {
                node_idx,
                feature: split.feature,
                categorical: split.categorical,
                threshold: split.threshold,
                gain: split.gain,
                frequency,
                n_samples,
                depth,
                listed,
                zeros_left,
                listed_frequency,
                zero_child: None,
                #[cfg(test)]
                before,
            },
            zero_frequency,
        )
    }

    /// Restore the counters shifted for `split` and write its node.
    fn close(
        &mut self,
        split: OpenSplit,
        zero_child: NodeIndex,
        listed_child: NodeIndex,
    ) -> NodeIndex {
        let dataset = self.dataset;
        let column = dataset.column(split.feature.index());
        self.shift_all(1);
        self.shift_range(column, split.listed, -1);

        #[cfg(test)]
        assert_eq!(split.before, self.valid, "valid counters not restored after subtree");

        let (left, right) = if split.zeros_left {
            (zero_child, listed_child)
        } else {
            (listed_child, zero_child)
        };
        self.nodes[split.node_idx] = Node::Split {
            feature: split.feature,
            categorical: split.categorical,
            threshold: split.threshold,
            gain: split.gain,
            left,
            right,
            frequency: split.frequency,
            n_samples: split.n_samples,
        };
        NodeIndex::new(split.node_idx)
    }

    fn make_leaf(&mut self, frequency: Vec<f64>, n_samples: usize) -> NodeIndex {
        let idx = NodeIndex::new(self.nodes.len());
        self.nodes.push(Node::Leaf {
            leaf_index: self.leaves.len(),
            distribution: normalize(&frequency),
            frequency,
            n_samples,
        });
        self.leaves.push(idx);
        idx
    }

    /// Unweighted example count recovered from a weighted frequency.
    fn effective_count(&self, frequency: &[f64]) -> usize {
        let weights = self.dataset.class_weight();
        let count: f64 = frequency.iter().zip(weights).map(|(f, w)| f / w).sum();
        count.round() as usize
    }

    fn shift_range(&mut self, column: &[ColumnEntry], range: Range<usize>, delta: i32) {
        for entry in &column[range] {
            self.valid[entry.example] += delta;
        }
    }

    fn shift_all(&mut self, delta: i32) {
        for v in &mut self.valid {
            *v += delta;
        }
    }

    #[cfg(test)]
    fn check_partition(&self, n_samples: usize) {
        let active = self.valid.iter().filter(|&&v| v > 0).count();
        assert_eq!(active, n_samples, "active examples disagree with node frequency");
        assert!(self.valid.iter().all(|&v| v <= 1), "active counter above 1");
    }
}

/// A fitted decision tree.
///
/// Nodes live in an arena with the root at index 0; the leaf table maps
/// each leaf index to its arena position.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DecisionTree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) leaves: Vec<NodeIndex>,
    pub(crate) n_features: usize,
    pub(crate) n_classes: usize,
    pub(crate) max_features: usize,
    #[serde(skip)]
    pub(crate) importance: OnceLock<Vec<f64>>,
}

impl DecisionTree {
    /// Return the leaf index reached by each example.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::FeatureOutOfRange`] when an example references a
    /// feature `>= n_features`.
    pub fn apply(&self, examples: &[SparseExample]) -> Result<Vec<usize>, RfError> {
        let mut scratch = DenseScratch::new(self.n_features);
        let mut out = Vec::with_capacity(examples.len());
        for (example_index, example) in examples.iter().enumerate() {
            let dense = scratch.load(example, example_index)?;
            out.push(self.leaf_index(dense));
            scratch.clear(example);
        }
        Ok(out)
    }

    /// Return the leaf class distribution of each example, class-major.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::FeatureOutOfRange`] when an example references a
    /// feature `>= n_features`.
    pub fn predict_proba(&self, examples: &[SparseExample]) -> Result<ClassScores, RfError> {
        let mut scores = ClassScores::zeros(examples.len(), self.n_classes);
        let mut scratch = DenseScratch::new(self.n_features);
        for (example_index, example) in examples.iter().enumerate() {
            let dense = scratch.load(example, example_index)?;
            scores.add_example(example_index, self.distribution(dense));
            scratch.clear(example);
        }
        Ok(scores)
    }

    /// Return the most probable class of each example (lowest index on ties).
    ///
    /// # Errors
    ///
    /// Returns [`RfError::FeatureOutOfRange`] when an example references a
    /// feature `>= n_features`.
    pub fn predict_label(&self, examples: &[SparseExample]) -> Result<Vec<usize>, RfError> {
        Ok(self.predict_proba(examples)?.predicted_labels())
    }

    /// Gini gains summed per split feature, L1-normalized.
    ///
    /// Computed on first use and cached. All zeros when the tree is a single leaf.
    #[must_use]
    pub fn feature_importances(&self) -> &[f64] {
        self.importance.get_or_init(|| self.compute_importances())
    }

    /// Drop the cached importances and compute them again.
    pub fn recompute_importances(&mut self) -> &[f64] {
        self.importance = OnceLock::new();
        self.feature_importances()
    }

    /// Return the total number of nodes in the tree (both splits and leaves).
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaf nodes.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Return the number of features the tree was grown with.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Return the resolved number of candidate features per node.
    #[must_use]
    pub fn max_features(&self) -> usize {
        self.max_features
    }

    /// Return the node arena, root first.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the leaf node with the given leaf index.
    #[must_use]
    pub fn leaf(&self, leaf_index: usize) -> Option<&Node> {
        self.leaves.get(leaf_index).map(|idx| &self.nodes[idx.index()])
    }

    /// Return the maximum depth of the tree.
    ///
    /// A single-node tree (just a root leaf) has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut max_depth = 0usize;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((node_idx, d)) = stack.pop() {
            match &self.nodes[node_idx] {
                Node::Leaf { .. } => max_depth = max_depth.max(d),
                Node::Split { left, right, .. } => {
                    stack.push((left.index(), d + 1));
                    stack.push((right.index(), d + 1));
                }
            }
        }
        max_depth
    }

    /// Check that the arena is a tree prediction can walk safely.
    ///
    /// Children must follow their parent and be reached exactly once from
    /// the root, split features must be in range, and the leaf table must
    /// point at leaves carrying `n_classes` probabilities.
    pub(crate) fn check_structure(&self) -> Result<(), String> {
        let n_nodes = self.nodes.len();
        if n_nodes == 0 {
            return Err("tree has no nodes".to_string());
        }
        if self.n_classes == 0 || self.n_features == 0 {
            return Err(format!(
                "tree declares {} classes and {} features",
                self.n_classes, self.n_features
            ));
        }

        let mut reached = vec![false; n_nodes];
        reached[0] = true;
        let mut n_leaf_nodes = 0usize;
        for (idx, node) in self.nodes.iter().enumerate() {
            if !reached[idx] {
                return Err(format!("node {idx} is not reachable from the root"));
            }
            match node {
                Node::Split {
                    feature, left, right, ..
                } => {
                    if feature.index() >= self.n_features {
                        return Err(format!(
                            "node {idx} splits on feature {feature} of {}",
                            self.n_features
                        ));
                    }
                    for child in [left.index(), right.index()] {
                        if child <= idx || child >= n_nodes {
                            return Err(format!("node {idx} has child {child} out of order"));
                        }
                        if reached[child] {
                            return Err(format!("node {child} has two parents"));
                        }
                        reached[child] = true;
                    }
                }
                Node::Leaf {
                    leaf_index,
                    distribution,
                    ..
                } => {
                    n_leaf_nodes += 1;
                    if distribution.len() != self.n_classes {
                        return Err(format!(
                            "leaf node {idx} holds {} probabilities for {} classes",
                            distribution.len(),
                            self.n_classes
                        ));
                    }
                    if self.leaves.get(*leaf_index).map(|n| n.index()) != Some(idx) {
                        return Err(format!(
                            "leaf table entry {leaf_index} does not point at node {idx}"
                        ));
                    }
                }
            }
        }
        if n_leaf_nodes != self.leaves.len() {
            return Err(format!(
                "leaf table has {} entries for {n_leaf_nodes} leaves",
                self.leaves.len()
            ));
        }
        Ok(())
    }

    /// Walk a dense feature vector from the root to its leaf.
    pub(crate) fn leaf_node(&self, dense: &[f64]) -> &Node {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                node @ Node::Leaf { .. } => return node,
                Node::Split {
                    feature,
                    categorical,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    idx = if goes_left(*categorical, *threshold, dense[feature.index()]) {
                        left.index()
                    } else {
                        right.index()
                    };
                }
            }
        }
    }

    pub(crate) fn leaf_index(&self, dense: &[f64]) -> usize {
        match self.leaf_node(dense) {
            Node::Leaf { leaf_index, .. } => *leaf_index,
            Node::Split { .. } => unreachable!("leaf_node always ends at a leaf"),
        }
    }

    pub(crate) fn distribution(&self, dense: &[f64]) -> &[f64] {
        match self.leaf_node(dense) {
            Node::Leaf { distribution, .. } => distribution,
            Node::Split { .. } => unreachable!("leaf_node always ends at a leaf"),
        }
    }

    fn compute_importances(&self) -> Vec<f64> {
        let mut totals = vec![0.0f64; self.n_features];
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            if let Node::Split {
                feature,
                gain,
                left,
                right,
                ..
            } = &self.nodes[idx]
            {
                totals[feature.index()] += gain;
                stack.push(right.index());
                stack.push(left.index());
            }
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            totals.iter_mut().for_each(|v| *v /= sum);
        }
        totals
    }
}
