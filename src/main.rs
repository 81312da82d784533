use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser};
use serde::Serialize;
use tracing::{info, warn};

use thicket_io::{
    ImportanceTarget, LearnMode, LibsvmReader, ModelFormat, RunConfig, write_importances,
    write_predictions, write_report,
};
use thicket_rf::{DatasetBuilder, PerformanceReport, RandomForest, SparseExample};

#[derive(Parser)]
#[command(name = "thicket")]
#[command(about = "Random forest classification for sparse libsvm datasets")]
#[command(version)]
#[command(group(ArgGroup::new("source").required(true).args(["train", "load"])))]
struct Cli {
    /// Path to the TOML run configuration
    #[arg(long, default_value = "conf/thicket.toml")]
    config: PathBuf,

    /// Train a new forest from [train]
    #[arg(long)]
    train: bool,

    /// Load a forest from [input_model]
    #[arg(long)]
    load: bool,

    /// Write the trained forest to [output_model]
    #[arg(long)]
    dump: bool,

    /// Export the forest as graphviz to random_forest.dot_file_path
    #[arg(long)]
    dot: bool,

    /// Score the forest on the labeled [validate] set
    #[arg(long)]
    validate: bool,

    /// Predict the unlabeled [test] set
    #[arg(long)]
    test: bool,

    /// Print ranked feature importances: "stdout" or a file path
    #[arg(long)]
    imp: Option<String>,

    /// Only report the N most important features
    #[arg(long = "imp-n", requires = "imp")]
    imp_n: Option<usize>,

    /// Override the worker thread count from the config
    #[arg(long)]
    threads: Option<usize>,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Serialize)]
struct RunSummary {
    config: PathBuf,
    model_source: &'static str,
    n_trees: usize,
    n_features: usize,
    n_classes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    n_train_examples: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_model: Option<SavedModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dot_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<ValidationOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    test: Option<TestOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    importances: Option<ImportanceOutput>,
}

#[derive(Serialize)]
struct SavedModel {
    path: PathBuf,
    format: String,
}

#[derive(Serialize)]
struct ValidationOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    report_path: Option<PathBuf>,
    report: PerformanceReport,
}

#[derive(Serialize)]
struct TestOutput {
    n_examples: usize,
    result_path: PathBuf,
}

/// With `--imp stdout` the ranking is part of the summary itself.
#[derive(Serialize)]
struct ImportanceOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    n_reported: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    ranked: Option<Vec<ImportanceEntry>>,
}

#[derive(Serialize)]
struct ImportanceEntry {
    rank: usize,
    /// 1-based, as in the libsvm input.
    feature_id: usize,
    importance: f64,
}

/// Read a libsvm file after checking its declared shape against the model.
fn read_for_model(
    forest: &RandomForest,
    section: &str,
    path: &Path,
    n_classes: usize,
    n_features: usize,
    mode: LearnMode,
) -> Result<Vec<SparseExample>> {
    if n_classes != forest.n_classes() {
        bail!(
            "`n_classes` under [{section}] is {n_classes}, but the model has {}",
            forest.n_classes()
        );
    }
    if n_features != forest.n_features() {
        bail!(
            "`n_features` under [{section}] is {n_features}, but the model has {}",
            forest.n_features()
        );
    }
    LibsvmReader::new(path, n_features, mode)
        .read()
        .with_context(|| format!("failed to read the [{section}] data"))
}

fn train_forest(config: &RunConfig, threads: Option<usize>) -> Result<(RandomForest, usize)> {
    let settings = config.train_settings().context("invalid [train] settings")?;
    let mut rf_config = config
        .forest_config()
        .context("invalid [random_forest] settings")?;
    if let Some(n_threads) = threads {
        rf_config = rf_config.with_n_threads(n_threads);
    }

    let examples = LibsvmReader::new(&settings.path, settings.n_features, LearnMode::Train)
        .read()
        .context("failed to read the training data")?;

    let mut builder = DatasetBuilder::new(settings.n_classes, settings.n_features)
        .with_categorical(settings.categorical);
    if let Some(weights) = settings.class_weight {
        builder = builder.with_class_weight(weights);
    }
    let dataset = builder
        .build(&examples)
        .context("failed to build the training dataset")?;

    let forest = rf_config.fit(&dataset).context("training failed")?;
    Ok((forest, examples.len()))
}

fn load_forest(config: &RunConfig, threads: Option<usize>) -> Result<RandomForest> {
    let model = config.input_model().context("invalid [input_model] settings")?;
    let mut forest = match model.format {
        ModelFormat::Envelope => RandomForest::load(&model.path),
        ModelFormat::Dump => RandomForest::load_dump(&model.path),
    }
    .with_context(|| format!("failed to load model from {}", model.path.display()))?;
    if let Some(n_threads) = threads {
        forest
            .set_n_threads(n_threads)
            .context("invalid --threads value")?;
    }
    Ok(forest)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = RunConfig::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;

    // 1. Train or load
    let (forest, n_train_examples) = if cli.train {
        let (forest, n) = train_forest(&config, cli.threads)?;
        (forest, Some(n))
    } else {
        (load_forest(&config, cli.threads)?, None)
    };
    info!(
        n_trees = forest.n_trees(),
        n_features = forest.n_features(),
        n_classes = forest.n_classes(),
        "model ready"
    );

    // 2. Save
    let mut saved_model = None;
    if cli.dump {
        if cli.load {
            warn!("--dump ignored for a loaded model");
        } else {
            let model = config.output_model().context("invalid [output_model] settings")?;
            match model.format {
                ModelFormat::Envelope => forest.save(&model.path),
                ModelFormat::Dump => forest.dump(&model.path),
            }
            .with_context(|| format!("failed to write model to {}", model.path.display()))?;
            saved_model = Some(SavedModel {
                path: model.path,
                format: model.format.to_string(),
            });
        }
    }

    // 3. Dot export
    let mut dot_path = None;
    if cli.dot {
        let (path, mode) = config
            .dot_settings()
            .context("invalid [random_forest] settings")?;
        forest
            .export_dot(&path, mode)
            .context("dot export failed")?;
        dot_path = Some(path);
    }

    // 4. Validate
    let mut validation = None;
    if cli.validate {
        let settings = config
            .validate_settings()
            .context("invalid [validate] settings")?;
        let examples = read_for_model(
            &forest,
            "validate",
            &settings.path,
            settings.n_classes,
            settings.n_features,
            LearnMode::Train,
        )?;
        let labels: Vec<usize> = examples.iter().filter_map(SparseExample::label).collect();
        let scores = forest
            .predict_proba(&examples)
            .context("validation prediction failed")?;
        let report = PerformanceReport::evaluate(&scores, &labels, Some(settings.threshold))
            .context("failed to score the validation set")?;
        info!(
            accuracy = report.accuracy,
            roc_auc = report.roc_auc,
            "validation done"
        );
        if let Some(path) = &settings.report_path {
            write_report(path, &report)?;
        }
        validation = Some(ValidationOutput {
            report_path: settings.report_path,
            report,
        });
    }

    // 5. Test
    let mut test = None;
    if cli.test {
        let settings = config.test_settings().context("invalid [test] settings")?;
        let examples = read_for_model(
            &forest,
            "test",
            &settings.path,
            settings.n_classes,
            settings.n_features,
            LearnMode::Test,
        )?;
        let scores = forest
            .predict_proba(&examples)
            .context("test prediction failed")?;
        write_predictions(
            &settings.result_path,
            &scores,
            settings.result_mode,
            settings.threshold,
            settings.sort,
        )?;
        test = Some(TestOutput {
            n_examples: examples.len(),
            result_path: settings.result_path,
        });
    }

    // 6. Importances
    let mut importances = None;
    if let Some(target) = cli.imp.as_deref() {
        let ranked = forest.ranked_importances(cli.imp_n);
        let n_reported = ranked.len();
        importances = Some(match ImportanceTarget::from(target) {
            ImportanceTarget::Stdout => ImportanceOutput {
                path: None,
                n_reported,
                ranked: Some(
                    ranked
                        .iter()
                        .map(|r| ImportanceEntry {
                            rank: r.rank,
                            feature_id: r.feature.index() + 1,
                            importance: r.importance,
                        })
                        .collect(),
                ),
            },
            ImportanceTarget::File(path) => {
                write_importances(&path, &ranked)?;
                ImportanceOutput {
                    path: Some(path),
                    n_reported,
                    ranked: None,
                }
            }
        });
    }

    // 7. Print summary
    let output = RunSummary {
        config: cli.config,
        model_source: if cli.train { "train" } else { "load" },
        n_trees: forest.n_trees(),
        n_features: forest.n_features(),
        n_classes: forest.n_classes(),
        n_train_examples,
        saved_model,
        dot_path,
        validation,
        test,
        importances,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
