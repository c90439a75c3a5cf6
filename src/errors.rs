//! Analysis error taxonomy.
use thiserror::Error;

use crate::analysis::AnalysisStage;

/// Errors that may rise during an analysis run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    /// Invalid request: bad region or resolution. Fails fast, never retried.
    #[error("validation failed: {reason}")]
    Validation { reason: String },
    /// External flux provider is offline or refused the query.
    /// Retryable at the adapter boundary, outside this core.
    #[error("data source \"{source_id}\" unavailable")]
    DataSourceUnavailable { source_id: String },
    /// Not enough supporting measurements inside the region.
    /// Resolved only by widening the region or adding sources.
    #[error("insufficient data: {available} point(s) available, {required} required")]
    InsufficientData { available: usize, required: usize },
    /// Epoch or coordinates outside geomagnetic model coverage.
    #[error("{what} = {value} outside model coverage [{min}, {max}]")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// Numerical breakdown that even the degraded (lower fidelity)
    /// method could not recover from.
    #[error("numerical instability in {stage}: {detail}")]
    NumericalInstability { stage: String, detail: String },
    /// Run was cancelled at a stage boundary.
    #[error("cancelled after {last_completed}")]
    Cancelled { last_completed: AnalysisStage },
}

impl AnalysisError {
    /// Builds a [AnalysisError::Validation] from any displayable reason.
    pub fn validation<T: std::fmt::Display>(reason: T) -> Self {
        Self::Validation {
            reason: reason.to_string(),
        }
    }
    /// Stable machine readable code, part of the wire contract.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::DataSourceUnavailable { .. } => "DATA_SOURCE_UNAVAILABLE",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::OutOfRange { .. } => "OUT_OF_RANGE",
            Self::NumericalInstability { .. } => "NUMERICAL_INSTABILITY",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }
}
