//! Forecast error types.

use thiserror::Error;

/// Boxed error returned by one-step predictors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the rolling-window forecaster.
#[derive(Error, Debug)]
pub enum ForecastError {
    /// Series is shorter than the lookback window
    #[error("Insufficient data: need at least {required} points, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// Invalid parameter value
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Input series contains NaN or infinity
    #[error("Non-finite observation at index {index}")]
    NonFiniteObservation { index: usize },

    /// One-step predictor failed or produced a non-finite value
    #[error("Prediction failed at step {step}: {source}")]
    PredictionStep {
        step: usize,
        #[source]
        source: BoxError,
    },
}

impl ForecastError {
    pub(crate) fn invalid(name: &str, reason: &str) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for forecaster operations.
pub type Result<T> = std::result::Result<T, ForecastError>;
