/// One sparse instance: `(feature, value)` pairs in insertion order plus an
/// optional class label.
///
/// Exact zeros are never stored. An unlisted feature has the implicit value
/// `0.0`, both during training and prediction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseExample {
    label: Option<usize>,
    entries: Vec<(usize, f64)>,
}

impl SparseExample {
    /// Create an empty example carrying `label`.
    #[must_use]
    pub fn labeled(label: usize) -> Self {
        Self {
            label: Some(label),
            entries: Vec::new(),
        }
    }

    /// Create an empty example without a label.
    #[must_use]
    pub fn unlabeled() -> Self {
        Self::default()
    }

    /// Build an example from `(feature, value)` pairs, dropping exact zeros.
    pub fn from_entries<I>(label: Option<usize>, entries: I) -> Self
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let mut example = Self {
            label,
            entries: Vec::new(),
        };
        for (feature, value) in entries {
            example.push(feature, value);
        }
        example
    }

    /// Append one entry. A value of exactly `0.0` is skipped.
    ///
    /// Range, uniqueness and finiteness are checked when the example is
    /// consumed, not here.
    pub fn push(&mut self, feature: usize, value: f64) {
        if value != 0.0 {
            self.entries.push((feature, value));
        }
    }

    /// Return the class label, if any.
    #[must_use]
    pub fn label(&self) -> Option<usize> {
        self.label
    }

    /// Replace the class label.
    pub fn set_label(&mut self, label: Option<usize>) {
        self.label = label;
    }

    /// Return the stored `(feature, value)` pairs in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    /// Return the number of stored (non-zero) entries.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` if no entry is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::SparseExample;

    #[test]
    fn push_skips_exact_zero() {
        let mut ex = SparseExample::labeled(1);
        ex.push(0, 0.0);
        ex.push(3, -0.0);
        ex.push(4, 2.5);
        assert_eq!(ex.entries(), &[(4, 2.5)]);
        assert_eq!(ex.nnz(), 1);
    }

    #[test]
    fn from_entries_keeps_order() {
        let ex = SparseExample::from_entries(None, [(5, 1.0), (2, 3.0), (7, 0.0)]);
        assert_eq!(ex.entries(), &[(5, 1.0), (2, 3.0)]);
        assert_eq!(ex.label(), None);
    }

    #[test]
    fn unlabeled_is_empty() {
        let ex = SparseExample::unlabeled();
        assert!(ex.is_empty());
        assert_eq!(ex.label(), None);
    }

    #[test]
    fn set_label_overwrites() {
        let mut ex = SparseExample::labeled(0);
        ex.set_label(Some(2));
        assert_eq!(ex.label(), Some(2));
    }
}
