//! Domain types for thicket-io.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// Whether libsvm lines start with a label token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnMode {
    /// `label id:value id:value ...`
    Train,
    /// `id:value id:value ...`
    Test,
}

/// What the test result file records per example.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultMode {
    /// Class probabilities.
    #[default]
    Proba,
    /// Predicted class labels.
    Label,
}

/// Ordering of test results by score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Lowest score first.
    Asc,
    /// Highest score first.
    Desc,
}

/// On-disk layout of a saved model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// Single bincode file with a versioned header.
    #[default]
    Envelope,
    /// Fixed-width record files `<path>0 ..= <path>n`.
    Dump,
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFormat::Envelope => f.write_str("envelope"),
            ModelFormat::Dump => f.write_str("dump"),
        }
    }
}

/// Where ranked feature importances are printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportanceTarget {
    /// Standard output.
    Stdout,
    /// A text file.
    File(PathBuf),
}

impl From<&str> for ImportanceTarget {
    fn from(raw: &str) -> Self {
        if raw == "stdout" {
            ImportanceTarget::Stdout
        } else {
            ImportanceTarget::File(PathBuf::from(raw))
        }
    }
}
