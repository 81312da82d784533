//! Writers for test predictions, feature importances and validation reports.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use thicket_rf::{ClassScores, PerformanceReport, RankedFeature};
use tracing::{info, instrument};

use crate::IoError;
use crate::domain::{ResultMode, SortOrder};

/// Write one line per test example to `path`.
///
/// Lines are `id<TAB>value...` where `id` is the 0-based position of the
/// example in the test file. For two classes the value is the class-1
/// probability (proba mode) or `1`/`0` against `threshold` (label mode).
/// With more classes, proba mode writes every class probability and label
/// mode writes the most probable class. `sort` orders lines by the class-1
/// probability (binary) or the top probability (multi-class), ties in id
/// order.
///
/// # Errors
///
/// Returns [`IoError::WriteFile`] if the file cannot be written.
#[instrument(skip(scores), fields(path = %path.display(), n_examples = scores.n_examples()))]
pub fn write_predictions(
    path: &Path,
    scores: &ClassScores,
    mode: ResultMode,
    threshold: f64,
    sort: Option<SortOrder>,
) -> Result<(), IoError> {
    write_file(path, |out| {
        format_predictions(out, scores, mode, threshold, sort)
    })?;
    info!(?mode, ?sort, "predictions written");
    Ok(())
}

/// Format predictions as described in [`write_predictions`].
///
/// # Errors
///
/// Returns any I/O error from `out`.
pub fn format_predictions(
    out: &mut impl Write,
    scores: &ClassScores,
    mode: ResultMode,
    threshold: f64,
    sort: Option<SortOrder>,
) -> std::io::Result<()> {
    let binary = scores.n_classes() == 2;
    let key = |i: usize| {
        if binary {
            scores.get(i, 1)
        } else {
            scores.get(i, scores.predicted_class(i))
        }
    };

    let mut order: Vec<usize> = (0..scores.n_examples()).collect();
    match sort {
        Some(SortOrder::Asc) => order.sort_by(|&a, &b| key(a).total_cmp(&key(b))),
        Some(SortOrder::Desc) => order.sort_by(|&a, &b| key(b).total_cmp(&key(a))),
        None => {}
    }

    for i in order {
        match (mode, binary) {
            (ResultMode::Proba, true) => writeln!(out, "{i}\t{:.3}", scores.get(i, 1))?,
            (ResultMode::Proba, false) => {
                let probs: Vec<String> =
                    scores.example(i).iter().map(|p| format!("{p:.3}")).collect();
                writeln!(out, "{i}\t{}", probs.join("\t"))?;
            }
            (ResultMode::Label, true) => {
                writeln!(out, "{i}\t{}", u8::from(scores.get(i, 1) >= threshold))?;
            }
            (ResultMode::Label, false) => writeln!(out, "{i}\t{}", scores.predicted_class(i))?,
        }
    }
    Ok(())
}

/// Format ranked importances as `rank<TAB>feature_id<TAB>importance` lines.
///
/// Feature ids are 1-based, matching the libsvm input.
///
/// # Errors
///
/// Returns any I/O error from `out`.
pub fn format_importances(out: &mut impl Write, ranked: &[RankedFeature]) -> std::io::Result<()> {
    for r in ranked {
        writeln!(out, "{}\t{}\t{:.6}", r.rank, r.feature.index() + 1, r.importance)?;
    }
    Ok(())
}

/// Write ranked importances to `path`.
///
/// # Errors
///
/// Returns [`IoError::WriteFile`] if the file cannot be written.
#[instrument(skip(ranked), fields(path = %path.display(), n_features = ranked.len()))]
pub fn write_importances(path: &Path, ranked: &[RankedFeature]) -> Result<(), IoError> {
    write_file(path, |out| format_importances(out, ranked))?;
    info!("importances written");
    Ok(())
}

/// Write a validation report to `path`.
///
/// A `.json` extension selects pretty-printed JSON; anything else gets the
/// plain-text table.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::EncodeJson`] | JSON encoding failed |
/// | [`IoError::WriteFile`] | file write failed |
#[instrument(skip(report), fields(path = %path.display()))]
pub fn write_report(path: &Path, report: &PerformanceReport) -> Result<(), IoError> {
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        let json = serde_json::to_string_pretty(report).map_err(|e| IoError::EncodeJson {
            path: path.to_path_buf(),
            source: e,
        })?;
        write_file(path, |out| writeln!(out, "{json}"))?;
    } else {
        write_file(path, |out| write!(out, "{report}"))?;
    }
    info!(accuracy = report.accuracy, json = is_json, "report written");
    Ok(())
}

fn write_file(
    path: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<(), IoError> {
    let to_error = |source| IoError::WriteFile {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(to_error)?;
    let mut out = BufWriter::new(file);
    body(&mut out).map_err(to_error)?;
    out.flush().map_err(to_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use thicket_rf::RandomForestConfig;

    fn binary_scores() -> ClassScores {
        let rows = vec![vec![0.7, 0.3], vec![0.1, 0.9], vec![0.5, 0.5]];
        ClassScores::from_rows(2, &rows).unwrap()
    }

    fn render(scores: &ClassScores, mode: ResultMode, sort: Option<SortOrder>) -> String {
        let mut out = Vec::new();
        format_predictions(&mut out, scores, mode, 0.5, sort).unwrap();
        String::from_utf8(out).unwrap()
    }

    // --- Predictions ---

    #[test]
    fn binary_proba_in_file_order() {
        let text = render(&binary_scores(), ResultMode::Proba, None);
        assert_eq!(text, "0\t0.300\n1\t0.900\n2\t0.500\n");
    }

    #[test]
    fn binary_label_uses_threshold_inclusively() {
        let text = render(&binary_scores(), ResultMode::Label, None);
        assert_eq!(text, "0\t0\n1\t1\n2\t1\n");
    }

    #[test]
    fn sorted_output() {
        let desc = render(&binary_scores(), ResultMode::Proba, Some(SortOrder::Desc));
        assert_eq!(desc, "1\t0.900\n2\t0.500\n0\t0.300\n");
        let asc = render(&binary_scores(), ResultMode::Label, Some(SortOrder::Asc));
        assert_eq!(asc, "0\t0\n2\t1\n1\t1\n");
    }

    #[test]
    fn multiclass_rows() {
        let rows = vec![vec![0.2, 0.5, 0.3], vec![0.6, 0.2, 0.2]];
        let scores = ClassScores::from_rows(3, &rows).unwrap();
        assert_eq!(
            render(&scores, ResultMode::Proba, Some(SortOrder::Desc)),
            "1\t0.600\t0.200\t0.200\n0\t0.200\t0.500\t0.300\n"
        );
        assert_eq!(render(&scores, ResultMode::Label, None), "0\t1\n1\t0\n");
    }

    #[test]
    fn write_predictions_to_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no_such_dir").join("out.tsv");
        let result = write_predictions(&path, &binary_scores(), ResultMode::Proba, 0.5, None);
        assert!(matches!(result, Err(IoError::WriteFile { .. })));
    }

    // --- Importances and reports ---

    fn small_forest() -> thicket_rf::RandomForest {
        let examples: Vec<thicket_rf::SparseExample> = (0..8)
            .map(|i| {
                thicket_rf::SparseExample::from_entries(
                    Some(i % 2),
                    [(1, (i % 2) as f64 * 4.0 + 1.0)],
                )
            })
            .collect();
        let ds = thicket_rf::SparseColumnDataset::build(&examples, 2, 2, None).unwrap();
        RandomForestConfig::new(3).unwrap().fit(&ds).unwrap()
    }

    #[test]
    fn importances_use_one_based_ids() {
        let ranked = small_forest().ranked_importances(Some(1));
        let mut out = Vec::new();
        format_importances(&mut out, &ranked).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1\t2\t1.000000\n");
    }

    #[test]
    fn report_text_and_json() {
        let dir = TempDir::new().unwrap();
        let report = PerformanceReport::evaluate(&binary_scores(), &[0, 1, 0], Some(0.5)).unwrap();

        let text_path = dir.path().join("report.txt");
        write_report(&text_path, &report).unwrap();
        let text = std::fs::read_to_string(&text_path).unwrap();
        assert!(text.contains("accuracy"));

        let json_path = dir.path().join("report.json");
        write_report(&json_path, &report).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json["n_examples"], 3);
        assert!(json["classes"].is_array());
    }
}
