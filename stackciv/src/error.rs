use serde::{Deserialize, Serialize};
use stack_math::{GridError, LinearFitError, SplineError, StatsError};
use thiserror::Error;

/// Errors produced while building, stacking or resampling a table.
#[derive(Error, Debug)]
pub enum StackError {
    /// Mutually exclusive or malformed options. Raised before any work starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Requested wavelength range not covered by the data.
    #[error("coverage error: {0}")]
    Coverage(String),

    /// An invariant between parallel per-pixel vectors was violated.
    #[error("numerical inconsistency: {0}")]
    NumericalInconsistency(String),

    /// The run was cancelled through its [`CancelToken`](crate::progress::CancelToken).
    #[error("operation cancelled")]
    Cancelled,

    #[error("statistics failed: {0}")]
    Stats(#[from] StatsError),

    #[error("spline fit failed: {0}")]
    Spline(#[from] SplineError),

    #[error("linear fit failed: {0}")]
    LinearFit(#[from] LinearFitError),

    #[error("completeness grid: {0}")]
    Grid(#[from] GridError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StackError>;

/// Non-fatal data-quality conditions recorded against an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityWarning {
    /// Every completeness factor was NaN or infinite; weight forced to 0.
    NonFiniteCompleteness,
    /// Completeness product was zero or negative; weight forced to 0.
    NonPositiveCompleteness,
    /// Light weighting had no positive inverse variance to normalise by.
    NoInverseVariance,
}

/// Per-object audit state after rebinning and weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectStatus {
    #[default]
    Ok,
    /// No overlap with the destination grid. Every pixel is flagged empty.
    NoCoverage,
    /// Pixels were kept but carry no statistical weight.
    Warning(QualityWarning),
}

pub(crate) fn length_mismatch(what: &str, expected: usize, got: usize) -> StackError {
    StackError::NumericalInconsistency(format!("{what}: expected length {expected}, got {got}"))
}
