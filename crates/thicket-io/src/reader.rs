//! libsvm text reader with full input validation.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thicket_rf::SparseExample;
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::LearnMode;

/// Reads sparse examples from a libsvm-format text file.
///
/// Expected format, one example per line:
/// - [`LearnMode::Train`]: `label id:value id:value ...`
/// - [`LearnMode::Test`]: `id:value id:value ...`
///
/// Feature ids are 1-based in the file and 0-based in the returned
/// examples. Tokens are separated by any whitespace and blank lines are
/// skipped. Explicit zero values are dropped.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::ReadLine`] | A line cannot be read (e.g. invalid UTF-8) |
/// | [`IoError::InvalidLabel`] | Label token is not a non-negative integer |
/// | [`IoError::MalformedToken`] | Token is not `id:value` or either side fails to parse |
/// | [`IoError::FeatureIdOutOfRange`] | Feature id is 0 or greater than `n_features` |
/// | [`IoError::NonFiniteValue`] | Value is NaN or infinite |
pub struct LibsvmReader {
    path: PathBuf,
    n_features: usize,
    mode: LearnMode,
}

impl LibsvmReader {
    /// Create a new reader for the given file.
    pub fn new(path: &Path, n_features: usize, mode: LearnMode) -> Self {
        Self {
            path: path.to_path_buf(),
            n_features,
            mode,
        }
    }

    /// Read and validate every line of the file.
    #[instrument(skip(self), fields(path = %self.path.display(), mode = ?self.mode))]
    pub fn read(&self) -> Result<Vec<SparseExample>, IoError> {
        let file = File::open(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        let mut examples = Vec::new();
        let mut n_entries = 0usize;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line_no = index + 1;
            let line = line.map_err(|e| IoError::ReadLine {
                path: self.path.clone(),
                line: line_no,
                source: e,
            })?;
            if let Some(example) = self.parse_line(&line, line_no)? {
                n_entries += example.nnz();
                examples.push(example);
            }
        }

        if examples.is_empty() {
            debug!("no examples in file");
        }
        info!(
            n_examples = examples.len(),
            n_entries,
            n_features = self.n_features,
            "libsvm file loaded"
        );
        Ok(examples)
    }

    /// Parse one line. Returns `Ok(None)` for a blank line.
    pub fn parse_line(&self, line: &str, line_no: usize) -> Result<Option<SparseExample>, IoError> {
        let mut tokens = line.split_whitespace().peekable();
        if tokens.peek().is_none() {
            return Ok(None);
        }

        let mut example = match self.mode {
            LearnMode::Train => {
                let raw = tokens.next().unwrap_or_default();
                let label = raw.parse::<usize>().map_err(|_| IoError::InvalidLabel {
                    path: self.path.clone(),
                    line: line_no,
                    raw: raw.to_string(),
                })?;
                SparseExample::labeled(label)
            }
            LearnMode::Test => SparseExample::unlabeled(),
        };

        for token in tokens {
            let (feature, value) = self.parse_token(token, line_no)?;
            example.push(feature, value);
        }
        Ok(Some(example))
    }

    /// Parse `id:value` into a 0-based feature index and its value.
    fn parse_token(&self, token: &str, line_no: usize) -> Result<(usize, f64), IoError> {
        let malformed = || IoError::MalformedToken {
            path: self.path.clone(),
            line: line_no,
            raw: token.to_string(),
        };

        let (id_raw, value_raw) = token.split_once(':').ok_or_else(malformed)?;
        let feature_id: usize = id_raw.parse().map_err(|_| malformed())?;
        let value: f64 = value_raw.parse().map_err(|_| malformed())?;

        if feature_id == 0 || feature_id > self.n_features {
            return Err(IoError::FeatureIdOutOfRange {
                path: self.path.clone(),
                line: line_no,
                feature_id,
                n_features: self.n_features,
            });
        }
        if !value.is_finite() {
            return Err(IoError::NonFiniteValue {
                path: self.path.clone(),
                line: line_no,
                feature_id,
                raw: value_raw.to_string(),
            });
        }
        Ok((feature_id - 1, value))
    }
}
