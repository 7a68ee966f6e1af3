//! Rolling-window closing price forecasts.
//!
//! A pre-trained sequence-to-one model predicts the next normalized close from
//! a window of recent closes. This crate turns that into a multi-day forecast by
//! feeding every prediction back into the window, and wires the forecaster to a
//! price history source and an HTTP API.

pub mod buffer;
pub mod config;
pub mod error;
pub mod forecast;
pub mod history;
pub mod predictor;
pub mod scaler;
pub mod server;
pub mod service;

pub use buffer::Window;
pub use config::Config;
pub use error::{BoxError, ForecastError};
pub use forecast::{forecast, ForecastResult};
pub use history::{HistoryError, HistoryProvider};
pub use predictor::{ModelSource, OneStepPredictor, OnnxPredictor};
pub use scaler::MinMaxScaler;
pub use service::{PredictionService, ServiceError, TickerForecast};

/// Library-wide error type for setup paths (config, model loading).
pub type Result<T> = anyhow::Result<T>;
