//! Column-major sparse dataset built from row-major [`SparseExample`]s.

use std::cmp::Ordering;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, instrument};

use crate::{RfError, example::SparseExample};

/// Partitions shorter than this are left for the final insertion pass.
const SMALL_PARTITION: usize = 7;

/// Seed of the pivot generator. The sort order is total, so the seed only
/// affects running time.
const PIVOT_SEED: u64 = 0x5eed;

/// One stored non-zero entry of a feature column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnEntry {
    /// Zero-based example id.
    pub example: usize,
    /// The non-zero feature value.
    pub value: f64,
}

/// Builder for [`SparseColumnDataset`].
///
/// # Defaults
///
/// | Parameter      | Default              |
/// |----------------|----------------------|
/// | `class_weight` | `1.0` for each class |
/// | `categorical`  | none                 |
/// | labels         | required             |
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    n_classes: usize,
    n_features: usize,
    class_weight: Option<Vec<f64>>,
    categorical: Vec<usize>,
    labeled: bool,
}

impl DatasetBuilder {
    /// Create a builder for a dataset with the given class and feature counts.
    #[must_use]
    pub fn new(n_classes: usize, n_features: usize) -> Self {
        Self {
            n_classes,
            n_features,
            class_weight: None,
            categorical: Vec::new(),
            labeled: true,
        }
    }

    /// Set the per-class weight vector (length `n_classes`).
    #[must_use]
    pub fn with_class_weight(mut self, class_weight: Vec<f64>) -> Self {
        self.class_weight = Some(class_weight);
        self
    }

    /// Mark zero-based feature ids as categorical.
    #[must_use]
    pub fn with_categorical(mut self, categorical: Vec<usize>) -> Self {
        self.categorical = categorical;
        self
    }

    /// Build without labels. The result can be inspected but not trained on.
    #[must_use]
    pub fn unlabeled(mut self) -> Self {
        self.labeled = false;
        self
    }

    /// Transpose `examples` into a column-major dataset.
    ///
    /// # Errors
    ///
    /// | Variant                            | When                                         |
    /// |------------------------------------|----------------------------------------------|
    /// | [`RfError::InvalidClassCount`]     | `n_classes` is zero                          |
    /// | [`RfError::ZeroFeatures`]          | `n_features` is zero                         |
    /// | [`RfError::EmptyDataset`]          | `examples` is empty                          |
    /// | [`RfError::ClassWeightLength`]     | weight vector length differs from n_classes  |
    /// | [`RfError::InvalidClassWeight`]    | a weight is not positive and finite          |
    /// | [`RfError::CategoricalOutOfRange`] | a categorical id is `>= n_features`          |
    /// | [`RfError::MissingLabel`]          | labeled mode and an example has no label     |
    /// | [`RfError::LabelOutOfRange`]       | a label is `>= n_classes`                    |
    /// | [`RfError::FeatureOutOfRange`]     | an entry's feature id is `>= n_features`     |
    /// | [`RfError::DuplicateFeature`]      | a feature appears twice in one example       |
    /// | [`RfError::NonFiniteValue`]        | a value is NaN or infinite                   |
    #[instrument(skip(self, examples), fields(n_examples = examples.len()))]
    pub fn build(&self, examples: &[SparseExample]) -> Result<SparseColumnDataset, RfError> {
        let n_classes = self.n_classes;
        let n_features = self.n_features;
        if n_classes == 0 {
            return Err(RfError::InvalidClassCount { n_classes });
        }
        if n_features == 0 {
            return Err(RfError::ZeroFeatures);
        }
        if examples.is_empty() {
            return Err(RfError::EmptyDataset);
        }

        let class_weight = match &self.class_weight {
            Some(weights) => {
                validate_class_weight(weights, n_classes)?;
                weights.clone()
            }
            None => vec![1.0; n_classes],
        };

        let mut categorical = vec![false; n_features];
        for &feature in &self.categorical {
            if feature >= n_features {
                return Err(RfError::CategoricalOutOfRange {
                    feature,
                    n_features,
                });
            }
            categorical[feature] = true;
        }

        let labels = if self.labeled {
            Some(collect_labels(examples, n_classes)?)
        } else {
            None
        };

        // --- Counting pass ---
        let total: usize = examples.iter().map(SparseExample::nnz).sum();
        let mut size = vec![0usize; n_features];
        let mut last_seen = vec![usize::MAX; n_features];
        let mut triples = Vec::with_capacity(total);
        for (example_index, example) in examples.iter().enumerate() {
            for &(feature, value) in example.entries() {
                if feature >= n_features {
                    return Err(RfError::FeatureOutOfRange {
                        example_index,
                        feature,
                        n_features,
                    });
                }
                if !value.is_finite() {
                    return Err(RfError::NonFiniteValue {
                        example_index,
                        feature,
                    });
                }
                if last_seen[feature] == example_index {
                    return Err(RfError::DuplicateFeature {
                        example_index,
                        feature,
                    });
                }
                last_seen[feature] = example_index;
                size[feature] += 1;
                triples.push(Triple {
                    feature,
                    example: example_index,
                    value,
                });
            }
        }

        let mut rng = ChaCha8Rng::seed_from_u64(PIVOT_SEED);
        hybrid_sort(&mut triples, &mut rng);

        let mut offsets = Vec::with_capacity(n_features + 1);
        offsets.push(0);
        let mut running = 0;
        for &count in &size {
            running += count;
            offsets.push(running);
        }

        let entries: Vec<ColumnEntry> = triples
            .into_iter()
            .map(|t| ColumnEntry {
                example: t.example,
                value: t.value,
            })
            .collect();
        let valid_features: Vec<usize> = (0..n_features).filter(|&f| size[f] > 0).collect();

        debug!(
            n_examples = examples.len(),
            n_entries = entries.len(),
            n_valid_features = valid_features.len(),
            "sparse column dataset built"
        );

        Ok(SparseColumnDataset {
            n_classes,
            n_features,
            n_examples: examples.len(),
            entries,
            offsets,
            labels,
            class_weight,
            categorical,
            valid_features,
        })
    }
}

/// Column-major view of a sparse dataset.
///
/// Every feature owns a contiguous slice of one backing vector, sorted by
/// value ascending with the example id as tie-break. Immutable after build.
#[derive(Debug, Clone)]
pub struct SparseColumnDataset {
    n_classes: usize,
    n_features: usize,
    n_examples: usize,
    entries: Vec<ColumnEntry>,
    offsets: Vec<usize>,
    labels: Option<Vec<usize>>,
    class_weight: Vec<f64>,
    categorical: Vec<bool>,
    valid_features: Vec<usize>,
}

impl SparseColumnDataset {
    /// Build a labeled dataset, optionally weighting classes.
    ///
    /// Shorthand for [`DatasetBuilder`]; see [`DatasetBuilder::build`] for errors.
    pub fn build(
        examples: &[SparseExample],
        n_classes: usize,
        n_features: usize,
        class_weight: Option<Vec<f64>>,
    ) -> Result<Self, RfError> {
        let mut builder = DatasetBuilder::new(n_classes, n_features);
        if let Some(weights) = class_weight {
            builder = builder.with_class_weight(weights);
        }
        builder.build(examples)
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Return the declared number of features.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Return the number of examples.
    #[must_use]
    pub fn n_examples(&self) -> usize {
        self.n_examples
    }

    /// Return the total number of stored entries.
    #[must_use]
    pub fn n_entries(&self) -> usize {
        self.entries.len()
    }

    /// Return the sorted column of `feature`.
    ///
    /// # Panics
    ///
    /// Panics if `feature >= n_features`.
    #[must_use]
    pub fn column(&self, feature: usize) -> &[ColumnEntry] {
        &self.entries[self.offsets[feature]..self.offsets[feature + 1]]
    }

    /// Return the number of non-zero entries of `feature`.
    #[must_use]
    pub fn size(&self, feature: usize) -> usize {
        self.offsets[feature + 1] - self.offsets[feature]
    }

    /// Return the labels, or `None` for an unlabeled dataset.
    #[must_use]
    pub fn labels(&self) -> Option<&[usize]> {
        self.labels.as_deref()
    }

    /// Return the per-class weight vector.
    #[must_use]
    pub fn class_weight(&self) -> &[f64] {
        &self.class_weight
    }

    /// Return `true` if `feature` is marked categorical.
    #[must_use]
    pub fn is_categorical(&self, feature: usize) -> bool {
        self.categorical[feature]
    }

    /// Return the features with at least one stored entry, ascending.
    #[must_use]
    pub fn valid_features(&self) -> &[usize] {
        &self.valid_features
    }

    /// Weighted class frequency over every example.
    pub(crate) fn class_frequency(&self, labels: &[usize]) -> Vec<f64> {
        let mut frequency = vec![0.0; self.n_classes];
        for &label in labels {
            frequency[label] += self.class_weight[label];
        }
        frequency
    }
}

fn validate_class_weight(weights: &[f64], n_classes: usize) -> Result<(), RfError> {
    if weights.len() != n_classes {
        return Err(RfError::ClassWeightLength {
            expected: n_classes,
            got: weights.len(),
        });
    }
    for (class, &weight) in weights.iter().enumerate() {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(RfError::InvalidClassWeight { class, weight });
        }
    }
    Ok(())
}

fn collect_labels(examples: &[SparseExample], n_classes: usize) -> Result<Vec<usize>, RfError> {
    examples
        .iter()
        .enumerate()
        .map(|(example_index, example)| match example.label() {
            None => Err(RfError::MissingLabel { example_index }),
            Some(label) if label >= n_classes => Err(RfError::LabelOutOfRange {
                example_index,
                label,
                n_classes,
            }),
            Some(label) => Ok(label),
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Triple {
    feature: usize,
    example: usize,
    value: f64,
}

fn compare(a: &Triple, b: &Triple) -> Ordering {
    a.feature
        .cmp(&b.feature)
        .then_with(|| a.value.total_cmp(&b.value))
        .then_with(|| a.example.cmp(&b.example))
}

fn less(a: &Triple, b: &Triple) -> bool {
    compare(a, b) == Ordering::Less
}

/// Lazy quicksort followed by a single insertion-sort pass.
fn hybrid_sort(triples: &mut [Triple], rng: &mut ChaCha8Rng) {
    lazy_quicksort(triples, rng);
    insertion_sort(triples);
}

/// Randomized-pivot quicksort that leaves short partitions unsorted.
///
/// Keys are distinct (duplicate `(feature, example)` pairs are rejected
/// before sorting), so the partition loops always stop at the pivot.
fn lazy_quicksort(triples: &mut [Triple], rng: &mut ChaCha8Rng) {
    let len = triples.len();
    if len <= SMALL_PARTITION {
        return;
    }
    let pick = rng.gen_range(0..len);
    triples.swap(0, pick);
    let pivot = triples[0];

    let mut i = 0;
    let mut j = len;
    loop {
        loop {
            i += 1;
            if i >= len || !less(&triples[i], &pivot) {
                break;
            }
        }
        loop {
            j -= 1;
            if !less(&pivot, &triples[j]) {
                break;
            }
        }
        if i >= j {
            break;
        }
        triples.swap(i, j);
    }
    triples.swap(0, j);

    let (head, tail) = triples.split_at_mut(j);
    lazy_quicksort(head, rng);
    lazy_quicksort(&mut tail[1..], rng);
}

fn insertion_sort(triples: &mut [Triple]) {
    for i in 1..triples.len() {
        let current = triples[i];
        let mut j = i;
        while j > 0 && less(&current, &triples[j - 1]) {
            triples[j] = triples[j - 1];
            j -= 1;
        }
        triples[j] = current;
    }
}
