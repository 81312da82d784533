//! I/O error types for thicket-io.

use std::path::PathBuf;

/// Errors from libsvm parsing, run configuration, and result writing.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Returned when the input file does not exist or is unreadable.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a line cannot be read from an open file.
    #[error("cannot read {path} at line {line}")]
    ReadLine {
        /// Path to the input file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the leading label token of a training line is not a
    /// non-negative integer.
    #[error("invalid label \"{raw}\" in {path} at line {line}")]
    InvalidLabel {
        /// Path to the input file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// The raw token.
        raw: String,
    },

    /// Returned when a token is not of the form `feature_id:value`.
    #[error("malformed token \"{raw}\" in {path} at line {line}: expected feature_id:value")]
    MalformedToken {
        /// Path to the input file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// The raw token.
        raw: String,
    },

    /// Returned when a 1-based feature id is 0 or exceeds the declared feature count.
    #[error("feature id {feature_id} in {path} at line {line} is outside 1..={n_features}")]
    FeatureIdOutOfRange {
        /// Path to the input file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// The 1-based feature id as written in the file.
        feature_id: usize,
        /// Declared number of features.
        n_features: usize,
    },

    /// Returned when a feature value is NaN or infinite.
    #[error("non-finite value \"{raw}\" for feature {feature_id} in {path} at line {line}")]
    NonFiniteValue {
        /// Path to the input file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// The 1-based feature id.
        feature_id: usize,
        /// The raw value text.
        raw: String,
    },

    /// Returned when the configuration file cannot be read.
    #[error("cannot read config {path}")]
    ConfigRead {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the configuration file is not valid TOML or has
    /// mistyped values.
    #[error("invalid config {path}: {source}")]
    ConfigParse {
        /// Path to the config file.
        path: PathBuf,
        /// TOML parse error.
        source: toml::de::Error,
    },

    /// Returned when a requested mode needs a key the config does not set.
    #[error("missing `{key}` under [{section}] in the config")]
    MissingSetting {
        /// TOML table name.
        section: &'static str,
        /// Key within the table.
        key: &'static str,
    },

    /// Returned when a config value is present but unusable.
    #[error("invalid `{key}` under [{section}]: {reason}")]
    InvalidSetting {
        /// TOML table name.
        section: &'static str,
        /// Key within the table.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Returned when a result file cannot be written.
    #[error("cannot write file {path}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a result cannot be encoded as JSON.
    #[error("cannot encode {path} as JSON")]
    EncodeJson {
        /// Destination path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}
