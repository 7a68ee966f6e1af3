//! Sliding input window for the one-step predictor.
//!
//! The window holds exactly `lookback` normalized values, oldest first.
//! Each forecast step drops the oldest value and appends the newest
//! prediction, so the length never changes once built.

use std::collections::VecDeque;

/// Fixed-length buffer of normalized observations fed to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    buffer: VecDeque<f64>,
    lookback: usize,
}

impl Window {
    /// Build a window from normalized values, oldest to newest.
    ///
    /// The lookback is the number of values supplied.
    ///
    /// # Example
    /// ```
    /// use stockie_forecast::Window;
    /// let window = Window::from_values([0.1, 0.2, 0.3]);
    /// assert_eq!(window.lookback(), 3);
    /// ```
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let buffer: VecDeque<f64> = values.into_iter().collect();
        let lookback = buffer.len();
        Self { buffer, lookback }
    }

    /// Drop the oldest value and append `value` at the newest end.
    pub fn shift(&mut self, value: f64) {
        if self.lookback == 0 {
            return;
        }
        self.buffer.pop_front();
        self.buffer.push_back(value);
    }

    /// Number of values held. Always equal to [`Window::lookback`].
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True only for a zero-lookback window.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Window length fixed at construction.
    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Most recent value.
    pub fn newest(&self) -> Option<f64> {
        self.buffer.back().copied()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.buffer.iter().copied()
    }

    /// Copy of the values, oldest to newest.
    pub fn to_vec(&self) -> Vec<f64> {
        self.buffer.iter().copied().collect()
    }

    /// Arithmetic mean of the window, `None` when empty.
    ///
    /// Not used by the forecaster itself. It is the moving-average baseline
    /// for closure predictors, and the stand-in model in tests and benches.
    pub fn mean(&self) -> Option<f64> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.buffer.iter().sum::<f64>() / self.buffer.len() as f64)
    }
}
