//! Configuration builder for Random Forest training.

use std::{fmt, str::FromStr};

use crate::{dataset::SparseColumnDataset, error::RfError, forest::RandomForest};

/// Strategy for determining the number of features to consider at each split.
///
/// Resolved counts are floored and never below 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaxFeatures {
    /// Square root of total features.
    Sqrt,
    /// Natural logarithm of total features.
    Log,
    /// A fraction of total features (must be in (0.0, 1.0]).
    Fraction(f64),
    /// A fixed count, capped at the number of features.
    Fixed(usize),
    /// All features (no subsampling).
    All,
}

impl MaxFeatures {
    /// Resolve the rule to a concrete count for `n_features` features.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidMaxFeatures`] for a fraction outside
    /// (0.0, 1.0] or a fixed count of zero.
    pub fn resolve(self, n_features: usize) -> Result<usize, RfError> {
        let n = n_features as f64;
        let resolved = match self {
            MaxFeatures::Sqrt => n.sqrt().floor() as usize,
            MaxFeatures::Log => n.ln().floor().max(0.0) as usize,
            MaxFeatures::Fraction(f) => {
                if !(f > 0.0 && f <= 1.0) {
                    return Err(RfError::InvalidMaxFeatures {
                        max_features: self,
                        n_features,
                    });
                }
                (n * f).floor() as usize
            }
            MaxFeatures::Fixed(0) => {
                return Err(RfError::InvalidMaxFeatures {
                    max_features: self,
                    n_features,
                });
            }
            MaxFeatures::Fixed(k) => k.min(n_features),
            MaxFeatures::All => n_features,
        };
        Ok(resolved.max(1))
    }
}

impl fmt::Display for MaxFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxFeatures::Sqrt => write!(f, "sqrt"),
            MaxFeatures::Log => write!(f, "log"),
            MaxFeatures::Fraction(x) => write!(f, "{x}"),
            MaxFeatures::Fixed(k) => write!(f, "{k}"),
            MaxFeatures::All => write!(f, "all"),
        }
    }
}

impl FromStr for MaxFeatures {
    type Err = RfError;

    /// Parse `sqrt`, `log`, `all`, a fraction in (0, 1], or an integer count above 1.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        match raw.to_ascii_lowercase().as_str() {
            "sqrt" => return Ok(MaxFeatures::Sqrt),
            "log" => return Ok(MaxFeatures::Log),
            "all" => return Ok(MaxFeatures::All),
            _ => {}
        }
        let unknown = || RfError::UnknownMaxFeatures {
            raw: raw.to_string(),
        };
        let value: f64 = raw.parse().map_err(|_| unknown())?;
        if value > 0.0 && value <= 1.0 {
            return Ok(MaxFeatures::Fraction(value));
        }
        if value > 1.0 && value.fract() == 0.0 && value.is_finite() {
            return Ok(MaxFeatures::Fixed(value as usize));
        }
        Err(unknown())
    }
}

/// Configuration for Random Forest training.
///
/// Construct via [`RandomForestConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter      | Default     |
/// |----------------|-------------|
/// | `n_threads`    | 1           |
/// | `max_features` | `Sqrt`      |
/// | `max_depth`    | `None`      |
/// | `min_split`    | 1           |
/// | `seed`         | 42          |
#[derive(Debug, Clone)]
pub struct RandomForestConfig {
    pub(crate) n_trees: usize,
    pub(crate) n_threads: usize,
    pub(crate) max_features: MaxFeatures,
    pub(crate) max_depth: Option<usize>,
    pub(crate) min_split: usize,
    pub(crate) seed: u64,
}

impl RandomForestConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, RfError> {
        if n_trees == 0 {
            return Err(RfError::InvalidTreeCount { n_trees });
        }
        Ok(Self {
            n_trees,
            n_threads: 1,
            max_features: MaxFeatures::Sqrt,
            max_depth: None,
            min_split: 1,
            seed: 42,
        })
    }

    // --- Setters ---

    /// Set the number of worker threads used for training and prediction.
    #[must_use]
    pub fn with_n_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    /// Set the max features strategy.
    #[must_use]
    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    /// Set the maximum tree depth. `None` means unlimited.
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

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the number of worker threads.
    #[must_use]
    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Return the max features strategy.
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

    /// Train a Random Forest on a labeled column-major dataset.
    ///
    /// # Errors
    ///
    /// | Variant                          | When                                        |
    /// |----------------------------------|---------------------------------------------|
    /// | [`RfError::InvalidThreadCount`]  | `n_threads` is zero                         |
    /// | [`RfError::InvalidMaxDepth`]     | `max_depth` is `Some(0)`                    |
    /// | [`RfError::InvalidMinSplit`]     | `min_split` is zero                         |
    /// | [`RfError::InvalidMaxFeatures`]  | the max-features rule cannot be resolved    |
    /// | [`RfError::UnlabeledDataset`]    | the dataset was built without labels        |
    /// | [`RfError::ThreadPool`]          | the worker pool cannot be created           |
    pub fn fit(&self, dataset: &SparseColumnDataset) -> Result<RandomForest, RfError> {
        crate::forest::train(self, dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- MaxFeatures::resolve ---

    #[test]
    fn sqrt_floors() {
        assert_eq!(MaxFeatures::Sqrt.resolve(10).unwrap(), 3);
        assert_eq!(MaxFeatures::Sqrt.resolve(1).unwrap(), 1);
    }

    #[test]
    fn log_is_natural_and_at_least_one() {
        assert_eq!(MaxFeatures::Log.resolve(100).unwrap(), 4);
        assert_eq!(MaxFeatures::Log.resolve(2).unwrap(), 1);
    }

    #[test]
    fn fraction_floors_with_minimum_one() {
        assert_eq!(MaxFeatures::Fraction(0.3).resolve(10).unwrap(), 3);
        assert_eq!(MaxFeatures::Fraction(0.01).resolve(10).unwrap(), 1);
    }

    #[test]
    fn fraction_out_of_range_errors() {
        assert!(MaxFeatures::Fraction(0.0).resolve(10).is_err());
        assert!(MaxFeatures::Fraction(1.5).resolve(10).is_err());
        assert!(MaxFeatures::Fraction(f64::NAN).resolve(10).is_err());
    }

    #[test]
    fn fixed_is_capped() {
        assert_eq!(MaxFeatures::Fixed(50).resolve(10).unwrap(), 10);
        assert!(matches!(
            MaxFeatures::Fixed(0).resolve(10).unwrap_err(),
            RfError::InvalidMaxFeatures { n_features: 10, .. }
        ));
    }

    // --- Parsing ---

    #[test]
    fn parse_named_rules() {
        assert_eq!("sqrt".parse::<MaxFeatures>().unwrap(), MaxFeatures::Sqrt);
        assert_eq!("LOG".parse::<MaxFeatures>().unwrap(), MaxFeatures::Log);
        assert_eq!(" all ".parse::<MaxFeatures>().unwrap(), MaxFeatures::All);
    }

    #[test]
    fn parse_numbers() {
        assert_eq!("0.25".parse::<MaxFeatures>().unwrap(), MaxFeatures::Fraction(0.25));
        assert_eq!("1".parse::<MaxFeatures>().unwrap(), MaxFeatures::Fraction(1.0));
        assert_eq!("12".parse::<MaxFeatures>().unwrap(), MaxFeatures::Fixed(12));
    }

    #[test]
    fn parse_rejects_garbage() {
        for raw in ["", "half", "-1", "2.5", "0"] {
            assert!(
                matches!(raw.parse::<MaxFeatures>(), Err(RfError::UnknownMaxFeatures { .. })),
                "{raw} should not parse"
            );
        }
    }

    #[test]
    fn display_roundtrips_through_parse() {
        for rule in [MaxFeatures::Sqrt, MaxFeatures::Log, MaxFeatures::All, MaxFeatures::Fixed(7)] {
            assert_eq!(rule.to_string().parse::<MaxFeatures>().unwrap(), rule);
        }
    }

    // --- RandomForestConfig ---

    #[test]
    fn defaults() {
        let config = RandomForestConfig::new(10).unwrap();
        assert_eq!(config.n_trees(), 10);
        assert_eq!(config.n_threads(), 1);
        assert_eq!(config.max_features(), MaxFeatures::Sqrt);
        assert_eq!(config.max_depth(), None);
        assert_eq!(config.min_split(), 1);
        assert_eq!(config.seed(), 42);
    }

    #[test]
    fn zero_trees_rejected() {
        assert!(matches!(
            RandomForestConfig::new(0),
            Err(RfError::InvalidTreeCount { n_trees: 0 })
        ));
    }

    #[test]
    fn setters_chain() {
        let config = RandomForestConfig::new(3)
            .unwrap()
            .with_n_threads(4)
            .with_max_features(MaxFeatures::All)
            .with_max_depth(Some(5))
            .with_min_split(2)
            .with_seed(7);
        assert_eq!(config.n_threads(), 4);
        assert_eq!(config.max_features(), MaxFeatures::All);
        assert_eq!(config.max_depth(), Some(5));
        assert_eq!(config.min_split(), 2);
        assert_eq!(config.seed(), 7);
    }
}
