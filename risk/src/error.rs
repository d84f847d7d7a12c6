//! Error types for the risk and valuation engine

use thiserror::Error;

/// Errors that can occur in risk, optimization and valuation calculations
#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Numerically invalid result in {computation}: {reason}")]
    NumericalInvalid {
        computation: &'static str,
        reason: String,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid confidence level: {0} (must be between 0 and 1)")]
    InvalidConfidenceLevel(f64),

    #[error("Invalid time horizon: {0} (must be positive)")]
    InvalidTimeHorizon(u32),

    #[error("Matrix operation failed: {0}")]
    MatrixError(String),

    #[error("Statement history is empty")]
    EmptyStatementHistory,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RiskError {
    pub fn numerical(computation: &'static str, reason: impl Into<String>) -> Self {
        RiskError::NumericalInvalid {
            computation,
            reason: reason.into(),
        }
    }

    /// True when an estimator had inputs but fewer observations than it needs.
    /// Absent inputs are errors, not shortages.
    pub fn is_data_shortage(&self) -> bool {
        matches!(self, RiskError::InsufficientData(_))
    }
}

pub type Result<T> = std::result::Result<T, RiskError>;
