//! Error taxonomy shared by the analysis routines

use std::path::PathBuf;

/// Errors raised by the analysis routines.
///
/// All computations are deterministic, so none of these are retried: they
/// surface to the caller, which aborts the current analysis step.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Requested product or key is absent from the aggregate table
    #[error("no data found for '{0}'")]
    NotFound(String),

    /// Arg-max over an empty result set
    #[error("empty result: {0}")]
    EmptyResult(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Required column absent or holding values of the wrong type
    #[error("data format error: {0}")]
    DataFormat(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),
}

/// Result type for the analysis routines
pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;
