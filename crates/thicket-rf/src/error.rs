use std::path::PathBuf;

use crate::config::MaxFeatures;

/// Errors from dataset construction, training, prediction, and persistence.
#[derive(Debug, thiserror::Error)]
pub enum RfError {
    /// Returned when n_trees is zero.
    #[error("n_trees must be at least 1, got {n_trees}")]
    InvalidTreeCount {
        /// The invalid n_trees value provided.
        n_trees: usize,
    },

    /// Returned when n_threads is zero.
    #[error("n_threads must be at least 1, got {n_threads}")]
    InvalidThreadCount {
        /// The invalid n_threads value provided.
        n_threads: usize,
    },

    /// Returned when max_depth is `Some(0)`.
    #[error("max_depth must be at least 1 (or unbounded), got {max_depth}")]
    InvalidMaxDepth {
        /// The invalid max_depth value provided.
        max_depth: usize,
    },

    /// Returned when min_split is zero.
    #[error("min_split must be at least 1, got {min_split}")]
    InvalidMinSplit {
        /// The invalid min_split value provided.
        min_split: usize,
    },

    /// Returned when a max-features rule cannot be resolved to a positive count.
    #[error("max_features rule {max_features} is invalid for {n_features} features")]
    InvalidMaxFeatures {
        /// The offending rule.
        max_features: MaxFeatures,
        /// The number of features in the dataset.
        n_features: usize,
    },

    /// Returned when a max-features rule string cannot be parsed.
    #[error(
        "unknown max_features rule \"{raw}\": expected sqrt, log, all, \
         a fraction in (0, 1] or a positive integer"
    )]
    UnknownMaxFeatures {
        /// The raw rule string.
        raw: String,
    },

    /// Returned when the declared number of classes is zero.
    #[error("n_classes must be at least 1, got {n_classes}")]
    InvalidClassCount {
        /// The invalid n_classes value provided.
        n_classes: usize,
    },

    /// Returned when the dataset has zero examples.
    #[error("dataset has zero examples")]
    EmptyDataset,

    /// Returned when the declared feature count is zero.
    #[error("dataset declares zero features")]
    ZeroFeatures,

    /// Returned when the class-weight vector length differs from n_classes.
    #[error("class weight vector has {got} entries, expected {expected}")]
    ClassWeightLength {
        /// The number of classes.
        expected: usize,
        /// The length of the supplied weight vector.
        got: usize,
    },

    /// Returned when a class weight is not a positive finite number.
    #[error("weight of class {class} must be positive and finite, got {weight}")]
    InvalidClassWeight {
        /// The class whose weight is invalid.
        class: usize,
        /// The offending weight.
        weight: f64,
    },

    /// Returned when an example references a feature outside `[0, n_features)`.
    #[error("example {example_index} references feature {feature}, but n_features is {n_features}")]
    FeatureOutOfRange {
        /// Zero-based index of the offending example.
        example_index: usize,
        /// The zero-based feature id found.
        feature: usize,
        /// The declared number of features.
        n_features: usize,
    },

    /// Returned when a feature appears twice in the same example.
    #[error("example {example_index} lists feature {feature} more than once")]
    DuplicateFeature {
        /// Zero-based index of the offending example.
        example_index: usize,
        /// The repeated zero-based feature id.
        feature: usize,
    },

    /// Returned when a feature value is NaN or infinite.
    #[error("non-finite value at example {example_index}, feature {feature}")]
    NonFiniteValue {
        /// Zero-based index of the offending example.
        example_index: usize,
        /// The zero-based feature id.
        feature: usize,
    },

    /// Returned when a labeled dataset contains an example without a label.
    #[error("example {example_index} has no label")]
    MissingLabel {
        /// Zero-based index of the offending example.
        example_index: usize,
    },

    /// Returned when a label lies outside `[0, n_classes)`.
    #[error("example {example_index} has label {label}, expected a value in [0, {n_classes})")]
    LabelOutOfRange {
        /// Zero-based index of the offending example.
        example_index: usize,
        /// The label found.
        label: usize,
        /// The declared number of classes.
        n_classes: usize,
    },

    /// Returned when training is attempted on a dataset built without labels.
    #[error("cannot train on an unlabeled dataset")]
    UnlabeledDataset,

    /// Returned when a categorical marker names a feature outside the feature range.
    #[error("categorical feature {feature} is out of range for {n_features} features")]
    CategoricalOutOfRange {
        /// The zero-based feature id marked categorical.
        feature: usize,
        /// The declared number of features.
        n_features: usize,
    },

    /// Returned when two parallel inputs have different lengths.
    #[error("length mismatch: expected {expected} entries, got {got}")]
    LengthMismatch {
        /// The expected length.
        expected: usize,
        /// The length found.
        got: usize,
    },

    /// Returned when the worker thread pool cannot be created.
    #[error("failed to build a pool of {n_threads} worker threads")]
    ThreadPool {
        /// The requested number of threads.
        n_threads: usize,
        /// The underlying rayon error.
        source: rayon::ThreadPoolBuildError,
    },

    /// Returned when model serialization fails.
    #[error("failed to serialize model")]
    SerializeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when model deserialization fails.
    #[error("failed to deserialize model from {path}")]
    DeserializeModel {
        /// Path to the model file that could not be deserialized.
        path: PathBuf,
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when writing a model or export file fails.
    #[error("failed to write {path}")]
    WriteModel {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the model file fails.
    #[error("failed to read model from {path}")]
    ReadModel {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when loading a model with an incompatible format version.
    #[error("incompatible model version in {path}: expected {expected}, found {found}")]
    IncompatibleModelVersion {
        /// The model format version this build expects.
        expected: u32,
        /// The model format version found in the file.
        found: u32,
        /// Path to the model file with the incompatible version.
        path: PathBuf,
    },

    /// Returned when a decoded model is structurally inconsistent.
    #[error("corrupt model in {path}: {reason}")]
    CorruptModel {
        /// Path to the offending file.
        path: PathBuf,
        /// Human-readable description of the inconsistency.
        reason: String,
    },
}
