//! libsvm ingestion, run configuration and result writers for thicket.

mod config;
mod domain;
mod error;
mod reader;
mod writer;

pub use config::{
    DEFAULT_THRESHOLD, DataSection, DotLayout, ForestSection, ModelSection, ModelSettings,
    RunConfig, TestSection, TestSettings, TrainSettings, ValidateSection, ValidateSettings,
};
pub use domain::{ImportanceTarget, LearnMode, ModelFormat, ResultMode, SortOrder};
pub use error::IoError;
pub use reader::LibsvmReader;
pub use writer::{
    format_importances, format_predictions, write_importances, write_predictions, write_report,
};
