//! Min-max normalization of observation series.
//!
//! The scaler is fit once on a historical series and then applied, unchanged,
//! to every value that flows through a forecast run, including the model's own
//! predictions. Values outside the fitted range extrapolate linearly.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};

/// Affine transform mapping `[min, max]` of the fitted data onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    data_min: f64,
    data_max: f64,
    /// `data_max - data_min`, or 1.0 for a constant series
    data_range: f64,
}

impl MinMaxScaler {
    /// Fit the scaler on every observation in `data`.
    ///
    /// Fails on an empty series or on any non-finite observation.
    pub fn fit(data: &[f64]) -> Result<Self> {
        if data.is_empty() {
            return Err(ForecastError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }

        let mut data_min = f64::INFINITY;
        let mut data_max = f64::NEG_INFINITY;
        for (index, &x) in data.iter().enumerate() {
            if !x.is_finite() {
                return Err(ForecastError::NonFiniteObservation { index });
            }
            data_min = data_min.min(x);
            data_max = data_max.max(x);
        }

        // Constant series would divide by zero; keep the transform invertible.
        let range = data_max - data_min;
        let data_range = if range > 0.0 { range } else { 1.0 };

        Ok(Self {
            data_min,
            data_max,
            data_range,
        })
    }

    /// Smallest fitted observation.
    pub fn data_min(&self) -> f64 {
        self.data_min
    }

    /// Largest fitted observation.
    pub fn data_max(&self) -> f64 {
        self.data_max
    }

    /// Map a raw value into normalized space.
    pub fn transform(&self, x: f64) -> f64 {
        (x - self.data_min) / self.data_range
    }

    /// Map a normalized value back into raw units.
    pub fn inverse_transform(&self, y: f64) -> f64 {
        y * self.data_range + self.data_min
    }

    /// Normalize a whole slice.
    pub fn transform_all(&self, data: &[f64]) -> Vec<f64> {
        data.iter().map(|&x| self.transform(x)).collect()
    }
}
