//! Iterative multi-step forecasting.
//!
//! A one-step model maps a window of `lookback` normalized values to the next
//! normalized value. Forecasting `horizon` steps ahead feeds each prediction
//! back into the window:
//!
//! ```text
//! scaler  = fit(series)                      // once, on history only
//! window  = scaler(series[n - lookback..n])
//! for step in 1..=horizon:
//!     y      = model(window)
//!     out   += scaler⁻¹(y)
//!     window = window[1..] ++ [y]
//! ```
//!
//! The scaler is never refit on predictions, so the output scale cannot drift
//! mid-run.

use crate::buffer::Window;
use crate::error::{ForecastError, Result};
use crate::predictor::OneStepPredictor;
use crate::scaler::MinMaxScaler;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Actual tail of the input series and the forecast that follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Last `lookback` raw observations, oldest first
    pub actual: Vec<f64>,

    /// `horizon` predictions in raw units
    pub predicted: Vec<f64>,
}

impl ForecastResult {
    /// First predicted value, i.e. the next period's forecast.
    pub fn next_value(&self) -> Option<f64> {
        self.predicted.first().copied()
    }
}

/// Forecast `horizon` values past the end of `series`.
///
/// `series` is ordered oldest to newest and must hold at least `lookback`
/// observations; the length check happens before the predictor is touched.
/// A predictor failure or non-finite output aborts the whole run with
/// [`ForecastError::PredictionStep`] carrying the 1-based step index.
///
/// # Example
/// ```
/// use stockie_forecast::{forecast, BoxError, Window};
///
/// let mut mean = |w: &Window| -> Result<f64, BoxError> { Ok(w.mean().unwrap_or(0.0)) };
/// let result = forecast(&[1.0, 2.0, 3.0, 4.0, 5.0], 3, 2, &mut mean).unwrap();
/// assert_eq!(result.predicted.len(), 2);
/// assert!((result.predicted[0] - 4.0).abs() < 1e-9);
/// ```
pub fn forecast<P>(
    series: &[f64],
    lookback: usize,
    horizon: usize,
    predictor: &mut P,
) -> Result<ForecastResult>
where
    P: OneStepPredictor + ?Sized,
{
    if lookback < 1 {
        return Err(ForecastError::invalid("lookback", "must be at least 1"));
    }
    if horizon < 1 {
        return Err(ForecastError::invalid("horizon", "must be at least 1"));
    }
    if series.len() < lookback {
        return Err(ForecastError::InsufficientData {
            required: lookback,
            actual: series.len(),
        });
    }

    let scaler = MinMaxScaler::fit(series)?;
    let tail = &series[series.len() - lookback..];
    let mut window = Window::from_values(tail.iter().map(|&x| scaler.transform(x)));

    let mut predicted = Vec::new();
    predicted
        .try_reserve_exact(horizon)
        .map_err(|_| ForecastError::invalid("horizon", "too large to allocate"))?;
    for step in 1..=horizon {
        let y = predictor
            .predict_one_step(&window)
            .map_err(|source| ForecastError::PredictionStep { step, source })?;

        if !y.is_finite() {
            return Err(ForecastError::PredictionStep {
                step,
                source: format!("predictor returned non-finite value {y}").into(),
            });
        }

        let value = scaler.inverse_transform(y);
        debug!(step, normalized = y, value, "forecast step");
        predicted.push(value);
        window.shift(y);
    }

    Ok(ForecastResult {
        actual: tail.to_vec(),
        predicted,
    })
}
