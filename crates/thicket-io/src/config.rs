//! TOML run configuration.
//!
//! Every table is optional in the file. Keys that a requested mode needs
//! are checked when that mode asks for its settings, so a config that only
//! trains never has to describe a test set.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thicket_rf::{DotMode, MaxFeatures, RandomForestConfig};
use tracing::{debug, instrument};

use crate::IoError;
use crate::domain::{ModelFormat, ResultMode, SortOrder};

/// Default decision threshold on the class-1 score.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Parsed run configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Forest hyperparameters and dot export.
    #[serde(default)]
    pub random_forest: ForestSection,
    /// Training set.
    pub train: Option<DataSection>,
    /// Labeled validation set.
    pub validate: Option<ValidateSection>,
    /// Unlabeled test set.
    pub test: Option<TestSection>,
    /// Model to load.
    pub input_model: Option<ModelSection>,
    /// Model to write after training.
    pub output_model: Option<ModelSection>,
}

/// The `[random_forest]` table.
///
/// | Key | Default |
/// |---|---|
/// | `n_trees` | 10 |
/// | `n_threads` | 1 |
/// | `max_depth` | unbounded |
/// | `min_split` | 1 |
/// | `max_features` | `"sqrt"` |
/// | `seed` | 42 |
/// | `dot_file_path` | none |
/// | `dot_mode` | `"forest"` |
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForestSection {
    pub n_trees: usize,
    pub n_threads: usize,
    pub max_depth: Option<usize>,
    pub min_split: usize,
    pub max_features: String,
    pub seed: u64,
    pub dot_file_path: Option<PathBuf>,
    pub dot_mode: DotLayout,
}

impl Default for ForestSection {
    fn default() -> Self {
        Self {
            n_trees: 10,
            n_threads: 1,
            max_depth: None,
            min_split: 1,
            max_features: "sqrt".to_string(),
            seed: 42,
            dot_file_path: None,
            dot_mode: DotLayout::Forest,
        }
    }
}

/// Dot export layout as written in the config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DotLayout {
    /// One graph for the whole forest.
    #[default]
    Forest,
    /// One numbered file per tree.
    Trees,
}

impl From<DotLayout> for DotMode {
    fn from(layout: DotLayout) -> Self {
        match layout {
            DotLayout::Forest => DotMode::WholeForest,
            DotLayout::Trees => DotMode::SeparateTrees,
        }
    }
}

/// The `[train]` table. `categorical` lists 1-based feature ids.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSection {
    pub path: Option<PathBuf>,
    pub n_classes: Option<usize>,
    pub n_features: Option<usize>,
    pub weight: Option<Vec<f64>>,
    #[serde(default)]
    pub categorical: Vec<usize>,
}

/// The `[validate]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateSection {
    pub path: Option<PathBuf>,
    pub n_classes: Option<usize>,
    pub n_features: Option<usize>,
    pub report_path: Option<PathBuf>,
    pub threshold: Option<f64>,
}

/// The `[test]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSection {
    pub path: Option<PathBuf>,
    pub n_classes: Option<usize>,
    pub n_features: Option<usize>,
    pub result_path: Option<PathBuf>,
    #[serde(default)]
    pub result_mode: ResultMode,
    pub threshold: Option<f64>,
    pub sort: Option<SortOrder>,
}

/// The `[input_model]` and `[output_model]` tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSection {
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub format: ModelFormat,
}

/// Validated `[train]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSettings {
    pub path: PathBuf,
    pub n_classes: usize,
    pub n_features: usize,
    /// Class weights normalized to sum to 1, if configured.
    pub class_weight: Option<Vec<f64>>,
    /// 0-based categorical feature indices.
    pub categorical: Vec<usize>,
}

/// Validated `[validate]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateSettings {
    pub path: PathBuf,
    pub n_classes: usize,
    pub n_features: usize,
    /// Report file; a `.json` extension selects JSON. `None` leaves the
    /// report in the run summary only.
    pub report_path: Option<PathBuf>,
    pub threshold: f64,
}

/// Validated `[test]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSettings {
    pub path: PathBuf,
    pub n_classes: usize,
    pub n_features: usize,
    pub result_path: PathBuf,
    pub result_mode: ResultMode,
    pub threshold: f64,
    pub sort: Option<SortOrder>,
}

/// Validated model location.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub format: ModelFormat,
}

fn required<T: Clone>(
    value: &Option<T>,
    section: &'static str,
    key: &'static str,
) -> Result<T, IoError> {
    value
        .clone()
        .ok_or(IoError::MissingSetting { section, key })
}

fn section<'a, T>(table: &'a Option<T>, name: &'static str) -> Result<&'a T, IoError> {
    table.as_ref().ok_or(IoError::MissingSetting {
        section: name,
        key: "path",
    })
}

fn check_threshold(threshold: f64, section: &'static str) -> Result<f64, IoError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(IoError::InvalidSetting {
            section,
            key: "threshold",
            reason: format!("{threshold} is outside [0, 1]"),
        })
    }
}

impl RunConfig {
    /// Read and parse a TOML config file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::ConfigRead`] | file cannot be read |
    /// | [`IoError::ConfigParse`] | invalid TOML, unknown key or mistyped value |
    #[instrument(fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, IoError> {
        let text = std::fs::read_to_string(path).map_err(|e| IoError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: RunConfig = toml::from_str(&text).map_err(|e| IoError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(
            has_train = config.train.is_some(),
            has_validate = config.validate.is_some(),
            has_test = config.test.is_some(),
            "config loaded"
        );
        Ok(config)
    }

    /// Build the forest configuration from `[random_forest]`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidSetting`] for a zero tree or thread count,
    /// or an unparseable `max_features`.
    pub fn forest_config(&self) -> Result<RandomForestConfig, IoError> {
        let rf = &self.random_forest;
        let invalid = |key, reason: String| IoError::InvalidSetting {
            section: "random_forest",
            key,
            reason,
        };
        let max_features: MaxFeatures = rf
            .max_features
            .parse()
            .map_err(|e: thicket_rf::RfError| invalid("max_features", e.to_string()))?;
        if rf.n_threads == 0 {
            return Err(invalid("n_threads", "must be at least 1".to_string()));
        }
        let config = RandomForestConfig::new(rf.n_trees)
            .map_err(|e| invalid("n_trees", e.to_string()))?
            .with_n_threads(rf.n_threads)
            .with_max_depth(rf.max_depth)
            .with_min_split(rf.min_split)
            .with_max_features(max_features)
            .with_seed(rf.seed);
        Ok(config)
    }

    /// Dot export destination and layout, if `dot_file_path` is set.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::MissingSetting`] when `dot_file_path` is absent.
    pub fn dot_settings(&self) -> Result<(PathBuf, DotMode), IoError> {
        let path = required(&self.random_forest.dot_file_path, "random_forest", "dot_file_path")?;
        Ok((path, self.random_forest.dot_mode.into()))
    }

    /// Validated `[train]` settings.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::MissingSetting`] | `path`, `n_classes` or `n_features` absent |
    /// | [`IoError::InvalidSetting`] | bad weight list or categorical feature id |
    pub fn train_settings(&self) -> Result<TrainSettings, IoError> {
        let train = section(&self.train, "train")?;
        let path = required(&train.path, "train", "path")?;
        let n_classes = required(&train.n_classes, "train", "n_classes")?;
        let n_features = required(&train.n_features, "train", "n_features")?;

        let class_weight = train
            .weight
            .as_deref()
            .map(|w| normalize_weights(w, n_classes))
            .transpose()?;

        let categorical = train
            .categorical
            .iter()
            .map(|&id| {
                if id == 0 || id > n_features {
                    Err(IoError::InvalidSetting {
                        section: "train",
                        key: "categorical",
                        reason: format!("feature id {id} is outside 1..={n_features}"),
                    })
                } else {
                    Ok(id - 1)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TrainSettings {
            path,
            n_classes,
            n_features,
            class_weight,
            categorical,
        })
    }

    /// Validated `[validate]` settings.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::MissingSetting`] when `path`, `n_classes` or
    /// `n_features` is absent, and [`IoError::InvalidSetting`] for a
    /// threshold outside `[0, 1]`.
    pub fn validate_settings(&self) -> Result<ValidateSettings, IoError> {
        let validate = section(&self.validate, "validate")?;
        Ok(ValidateSettings {
            path: required(&validate.path, "validate", "path")?,
            n_classes: required(&validate.n_classes, "validate", "n_classes")?,
            n_features: required(&validate.n_features, "validate", "n_features")?,
            report_path: validate.report_path.clone(),
            threshold: check_threshold(
                validate.threshold.unwrap_or(DEFAULT_THRESHOLD),
                "validate",
            )?,
        })
    }

    /// Validated `[test]` settings.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::MissingSetting`] when `path`, `n_classes`,
    /// `n_features` or `result_path` is absent, and
    /// [`IoError::InvalidSetting`] for a threshold outside `[0, 1]`.
    pub fn test_settings(&self) -> Result<TestSettings, IoError> {
        let test = section(&self.test, "test")?;
        Ok(TestSettings {
            path: required(&test.path, "test", "path")?,
            n_classes: required(&test.n_classes, "test", "n_classes")?,
            n_features: required(&test.n_features, "test", "n_features")?,
            result_path: required(&test.result_path, "test", "result_path")?,
            result_mode: test.result_mode,
            threshold: check_threshold(test.threshold.unwrap_or(DEFAULT_THRESHOLD), "test")?,
            sort: test.sort,
        })
    }

    /// Location of the model to load.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::MissingSetting`] when `[input_model]` has no `path`.
    pub fn input_model(&self) -> Result<ModelSettings, IoError> {
        model_settings(&self.input_model, "input_model")
    }

    /// Location to write the trained model.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::MissingSetting`] when `[output_model]` has no `path`.
    pub fn output_model(&self) -> Result<ModelSettings, IoError> {
        model_settings(&self.output_model, "output_model")
    }
}

fn model_settings(
    table: &Option<ModelSection>,
    name: &'static str,
) -> Result<ModelSettings, IoError> {
    let model = section(table, name)?;
    Ok(ModelSettings {
        path: required(&model.path, name, "path")?,
        format: model.format,
    })
}

/// Check one positive finite weight per class and scale them to sum to 1.
fn normalize_weights(weights: &[f64], n_classes: usize) -> Result<Vec<f64>, IoError> {
    let invalid = |reason: String| IoError::InvalidSetting {
        section: "train",
        key: "weight",
        reason,
    };
    if weights.len() != n_classes {
        return Err(invalid(format!(
            "expected {n_classes} weights, got {}",
            weights.len()
        )));
    }
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w <= 0.0) {
        return Err(invalid(format!("weight {w} is not a positive finite number")));
    }
    let total: f64 = weights.iter().sum();
    Ok(weights.iter().map(|w| w / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> RunConfig {
        toml::from_str(text).unwrap()
    }

    // --- Defaults ---

    #[test]
    fn empty_file_uses_forest_defaults() {
        let config = parse("");
        let rf = config.forest_config().unwrap();
        assert_eq!(rf.n_trees(), 10);
        assert_eq!(rf.n_threads(), 1);
        assert_eq!(rf.max_depth(), None);
        assert_eq!(rf.min_split(), 1);
        assert_eq!(rf.max_features(), MaxFeatures::Sqrt);
        assert_eq!(rf.seed(), 42);
    }

    #[test]
    fn forest_section_overrides() {
        let config = parse(
            r#"
            [random_forest]
            n_trees = 50
            n_threads = 4
            max_depth = 8
            max_features = "0.5"
            seed = 7
            dot_file_path = "out/tree_"
            dot_mode = "trees"
            "#,
        );
        let rf = config.forest_config().unwrap();
        assert_eq!(rf.n_trees(), 50);
        assert_eq!(rf.max_depth(), Some(8));
        assert_eq!(rf.max_features(), MaxFeatures::Fraction(0.5));
        let (path, mode) = config.dot_settings().unwrap();
        assert_eq!(path, PathBuf::from("out/tree_"));
        assert_eq!(mode, DotMode::SeparateTrees);
    }

    #[test]
    fn test_section_defaults() {
        let config = parse(
            r#"
            [test]
            path = "t.svm"
            n_classes = 2
            n_features = 10
            result_path = "out.tsv"
            "#,
        );
        let test = config.test_settings().unwrap();
        assert_eq!(test.result_mode, ResultMode::Proba);
        assert!((test.threshold - 0.5).abs() < 1e-10);
        assert_eq!(test.sort, None);
    }

    // --- Validation ---

    #[test]
    fn weights_are_normalized() {
        let config = parse(
            r#"
            [train]
            path = "a.svm"
            n_classes = 2
            n_features = 4
            weight = [1.0, 3.0]
            categorical = [2, 4]
            "#,
        );
        let train = config.train_settings().unwrap();
        assert_eq!(train.class_weight, Some(vec![0.25, 0.75]));
        assert_eq!(train.categorical, vec![1, 3]);
    }

    #[test]
    fn bad_weights_rejected() {
        for weight in ["[1.0]", "[1.0, 0.0]", "[1.0, -2.0]"] {
            let config = parse(&format!(
                "[train]\npath = \"a.svm\"\nn_classes = 2\nn_features = 4\nweight = {weight}\n"
            ));
            assert!(
                matches!(
                    config.train_settings(),
                    Err(IoError::InvalidSetting { key: "weight", .. })
                ),
                "{weight}"
            );
        }
    }

    #[test]
    fn categorical_id_out_of_range() {
        let config = parse(
            "[train]\npath = \"a.svm\"\nn_classes = 2\nn_features = 4\ncategorical = [5]\n",
        );
        assert!(matches!(
            config.train_settings(),
            Err(IoError::InvalidSetting { key: "categorical", .. })
        ));
    }

    #[test]
    fn missing_settings_name_section_and_key() {
        let config = parse("[train]\npath = \"a.svm\"\nn_classes = 2\n");
        assert!(matches!(
            config.train_settings(),
            Err(IoError::MissingSetting { section: "train", key: "n_features" })
        ));
        assert!(matches!(
            config.validate_settings(),
            Err(IoError::MissingSetting { section: "validate", .. })
        ));
        assert!(matches!(
            config.input_model(),
            Err(IoError::MissingSetting { section: "input_model", key: "path" })
        ));
        assert!(matches!(
            config.dot_settings(),
            Err(IoError::MissingSetting { key: "dot_file_path", .. })
        ));
    }

    #[test]
    fn invalid_forest_values() {
        let config = parse("[random_forest]\nn_trees = 0\n");
        assert!(matches!(
            config.forest_config(),
            Err(IoError::InvalidSetting { key: "n_trees", .. })
        ));
        let config = parse("[random_forest]\nmax_features = \"most\"\n");
        assert!(matches!(
            config.forest_config(),
            Err(IoError::InvalidSetting { key: "max_features", .. })
        ));
        let config = parse("[random_forest]\nn_threads = 0\n");
        assert!(matches!(
            config.forest_config(),
            Err(IoError::InvalidSetting { key: "n_threads", .. })
        ));
    }

    #[test]
    fn validate_report_path_optional() {
        let config = parse("[validate]\npath = \"v.svm\"\nn_classes = 2\nn_features = 3\n");
        let settings = config.validate_settings().unwrap();
        assert_eq!(settings.report_path, None);
        assert_eq!(settings.threshold, DEFAULT_THRESHOLD);

        let config = parse(
            "[validate]\npath = \"v.svm\"\nn_classes = 2\nn_features = 3\n\
             report_path = \"r.json\"\n",
        );
        let settings = config.validate_settings().unwrap();
        assert_eq!(settings.report_path, Some(PathBuf::from("r.json")));
    }

    #[test]
    fn threshold_range_checked() {
        let config = parse(
            "[validate]\npath = \"v.svm\"\nn_classes = 2\nn_features = 3\nthreshold = 1.5\n",
        );
        assert!(matches!(
            config.validate_settings(),
            Err(IoError::InvalidSetting { key: "threshold", .. })
        ));
    }

    #[test]
    fn unknown_keys_and_bad_enums_fail_to_parse() {
        assert!(toml::from_str::<RunConfig>("[random_forest]\ntrees = 3\n").is_err());
        assert!(toml::from_str::<RunConfig>("[test]\nresult_mode = \"score\"\n").is_err());
        assert!(toml::from_str::<RunConfig>("[output_model]\nformat = \"json\"\n").is_err());
    }

    #[test]
    fn model_format_defaults_to_envelope() {
        let config = parse(
            "[output_model]\npath = \"m.bin\"\n[input_model]\npath = \"d_\"\nformat = \"dump\"\n",
        );
        assert_eq!(config.output_model().unwrap().format, ModelFormat::Envelope);
        assert_eq!(config.input_model().unwrap().format, ModelFormat::Dump);
    }
}
