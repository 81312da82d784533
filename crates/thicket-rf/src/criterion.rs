/// Gini impurity over weighted class frequencies.
///
/// Construction primes the node being split; [`Gini::gain`] then scores
/// candidate left/right partitions of that node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gini {
    current_measure: f64,
    current_total: f64,
}

impl Gini {
    /// Prime the criterion with the frequency vector of the node being split.
    #[must_use]
    pub fn new(node_frequency: &[f64]) -> Self {
        Self {
            current_measure: Self::measure(node_frequency),
            current_total: node_frequency.iter().sum(),
        }
    }

    /// Gini impurity `1 - Σ (f_c / Σf)²`, or `0.0` when the vector carries no weight.
    #[must_use]
    pub fn measure(frequency: &[f64]) -> f64 {
        let total: f64 = frequency.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let sum_sq: f64 = frequency
            .iter()
            .map(|&f| {
                let p = f / total;
                p * p
            })
            .sum();
        1.0 - sum_sq
    }

    /// Impurity decrease of splitting the primed node into `left` and `right`.
    #[must_use]
    pub fn gain(&self, left: &[f64], right: &[f64]) -> f64 {
        if self.current_total <= 0.0 {
            return 0.0;
        }
        let left_total: f64 = left.iter().sum();
        let right_total: f64 = right.iter().sum();
        self.current_measure
            - left_total / self.current_total * Self::measure(left)
            - right_total / self.current_total * Self::measure(right)
    }

    /// Return the impurity of the primed node.
    #[must_use]
    pub fn current_measure(&self) -> f64 {
        self.current_measure
    }

    /// Return the total weight of the primed node.
    #[must_use]
    pub fn current_total(&self) -> f64 {
        self.current_total
    }
}

#[cfg(test)]
mod tests {
    use super::Gini;

    #[test]
    fn pure_node_measures_zero() {
        assert!(Gini::measure(&[0.0, 4.0, 0.0]).abs() < 1e-10);
    }

    #[test]
    fn empty_vector_measures_zero() {
        assert_eq!(Gini::measure(&[]), 0.0);
        assert_eq!(Gini::measure(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn balanced_binary_is_half() {
        assert!((Gini::measure(&[3.0, 3.0]) - 0.5).abs() < 1e-10);
    }

    #[test]
    fn measure_bounded_by_one_minus_inverse_k() {
        let freq = [1.0, 2.0, 3.0, 4.0];
        let g = Gini::measure(&freq);
        assert!(g >= 0.0);
        assert!(g <= 1.0 - 1.0 / freq.len() as f64 + 1e-12);
    }

    #[test]
    fn perfect_split_gains_full_measure() {
        let gini = Gini::new(&[2.0, 2.0]);
        let gain = gini.gain(&[2.0, 0.0], &[0.0, 2.0]);
        assert!((gain - 0.5).abs() < 1e-10);
    }

    #[test]
    fn gain_weights_right_side_by_its_own_measure() {
        // left pure (measure 0), right mixed (measure 0.5)
        let gini = Gini::new(&[3.0, 1.0]);
        let gain = gini.gain(&[2.0, 0.0], &[1.0, 1.0]);
        let expected = 0.375 - 0.5 * 0.5;
        assert!((gain - expected).abs() < 1e-10, "gain = {gain}");
    }

    #[test]
    fn uninformative_split_has_no_gain() {
        let gini = Gini::new(&[2.0, 2.0]);
        assert!(gini.gain(&[1.0, 1.0], &[1.0, 1.0]).abs() < 1e-10);
    }

    #[test]
    fn primed_totals() {
        let gini = Gini::new(&[1.0, 3.0]);
        assert!((gini.current_total() - 4.0).abs() < 1e-10);
        assert!((gini.current_measure() - 0.375).abs() < 1e-10);
    }
}
