//! Error types for the training orchestrator.

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the orchestrator can surface. None of them is recovered
/// locally: they travel up to the process boundary and end the run.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or mutually inconsistent run configuration.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The dataset pipeline could not produce a sample or batch.
    #[error("Data source error: {0}")]
    DataSource(String),

    /// A loss or gradient became NaN or infinite.
    #[error("Non-finite {what} at step {step}: {value}")]
    NumericalInstability {
        what: &'static str,
        step: usize,
        value: f64,
    },

    /// Log append, checkpoint or diagnostic write failure.
    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("CSV log error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// `RunningStatistic::average` called before any update.
    #[error("Average requested from an empty statistic")]
    EmptyStatistic,

    #[error("Shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A module state refers to a parameter the module does not have, or misses one it does.
    #[error("Unknown or missing parameter '{0}'")]
    UnknownParameter(String),
}

impl Error {
    pub(crate) fn shape(what: &'static str, expected: usize, got: usize) -> Self {
        Error::ShapeMismatch { what, expected, got }
    }
}
