//! Random forest classification over sparse, column-major datasets.
//!
//! Examples carry only their non-zero features. Training sorts every
//! feature column once and grows each tree by partitioning those columns in
//! place, so a node never touches the implicit zeros of an example. Trees
//! are grown in parallel via rayon, predictions average leaf class
//! distributions, and fitted forests can be saved, dumped in a fixed-width
//! record format, or exported as graphviz.

mod config;
mod criterion;
mod dataset;
mod dot;
mod dump;
mod error;
mod example;
mod forest;
mod importance;
mod metrics;
mod node;
mod parallel;
mod predict;
mod serialize;
mod split;
mod tree;

pub use config::{MaxFeatures, RandomForestConfig};
pub use criterion::Gini;
pub use dataset::{ColumnEntry, DatasetBuilder, SparseColumnDataset};
pub use dot::DotMode;
pub use error::RfError;
pub use example::SparseExample;
pub use forest::RandomForest;
pub use importance::RankedFeature;
pub use metrics::{ClassMetrics, ConfusionMatrix, PerformanceReport, pr_auc, roc_auc};
pub use node::{FeatureIndex, Node, NodeIndex};
pub use predict::ClassScores;
pub use tree::{DecisionTree, DecisionTreeConfig};
