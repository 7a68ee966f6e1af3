//! Ticker-level prediction service.
//!
//! Composes a [`HistoryProvider`] with a single shared [`OneStepPredictor`].
//! The predictor is built once at startup and lent to every forecast under a
//! mutex, so concurrent requests never run the model at the same time.

use crate::config::{Config, ForecastSettings};
use crate::error::ForecastError;
use crate::forecast::forecast;
use crate::history::{self, is_valid_ticker, normalize_ticker, HistoryError, HistoryProvider};
use crate::predictor::{OneStepPredictor, OnnxPredictor};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Forecast for one ticker, in the shape the web front end consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerForecast {
    pub ticker: String,

    /// Most recent `lookback` closes
    pub actual_prices: Vec<f64>,

    /// `horizon` forecast closes
    pub predicted_prices: Vec<f64>,

    /// First forecast close
    pub next_day_prediction: Option<f64>,
}

/// Errors surfaced by [`PredictionService::predict`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("ticker is required")]
    MissingTicker,

    #[error("invalid ticker: {0}")]
    InvalidTicker(String),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

impl ServiceError {
    /// HTTP status matching this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::MissingTicker | ServiceError::InvalidTicker(_) => 400,
            ServiceError::Forecast(ForecastError::InsufficientData { .. }) => 422,
            ServiceError::Forecast(ForecastError::InvalidParameter { .. }) => 400,
            ServiceError::Forecast(_) => 500,
            ServiceError::History(_) => 502,
        }
    }
}

/// Boxed predictor shared across requests.
pub type SharedPredictor = Box<dyn OneStepPredictor + Send>;

/// Fetches history and runs the rolling forecast for a ticker.
pub struct PredictionService {
    history: Box<dyn HistoryProvider>,
    predictor: Mutex<SharedPredictor>,
    settings: ForecastSettings,
}

impl PredictionService {
    pub fn new(
        history: Box<dyn HistoryProvider>,
        predictor: SharedPredictor,
        settings: ForecastSettings,
    ) -> Self {
        Self {
            history,
            predictor: Mutex::new(predictor),
            settings,
        }
    }

    /// Build the production service: Yahoo history stack and ONNX model.
    ///
    /// Blocking: may download the model and must not run on an async worker.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let predictor = OnnxPredictor::from_config(&config.model, config.forecast.lookback)?;
        let history = history::from_config(&config.history)?;
        info!(
            provider = history.name(),
            lookback = config.forecast.lookback,
            horizon = config.forecast.horizon,
            "Prediction service ready"
        );
        Ok(Self::new(history, Box::new(predictor), config.forecast.clone()))
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    /// Forecast with the configured horizon.
    pub fn predict(&self, ticker: &str) -> Result<TickerForecast, ServiceError> {
        self.predict_with_horizon(ticker, self.settings.horizon)
    }

    /// Forecast `horizon` steps for `ticker`.
    ///
    /// `horizon` must lie in `1..=max_horizon`; the ticker must be 1 to 16
    /// characters from `A-Z 0-9 . ^ = -` after normalization.
    pub fn predict_with_horizon(
        &self,
        ticker: &str,
        horizon: usize,
    ) -> Result<TickerForecast, ServiceError> {
        let ticker = normalize_ticker(ticker);
        if ticker.is_empty() {
            return Err(ServiceError::MissingTicker);
        }
        if !is_valid_ticker(&ticker) {
            return Err(ServiceError::InvalidTicker(ticker));
        }
        let max_horizon = self.settings.max_horizon;
        if horizon == 0 || horizon > max_horizon {
            return Err(ForecastError::invalid(
                "horizon",
                &format!("must be between 1 and {max_horizon}"),
            )
            .into());
        }
        let lookback = self.settings.lookback;
        let started = Instant::now();

        let closes = self
            .history
            .fetch_closes(&ticker, lookback)
            .map_err(|e| match e {
                HistoryError::NotFound(_) => ServiceError::Forecast(ForecastError::InsufficientData {
                    required: lookback,
                    actual: 0,
                }),
                HistoryError::InsufficientHistory {
                    required, actual, ..
                } => ServiceError::Forecast(ForecastError::InsufficientData { required, actual }),
                other => ServiceError::History(other),
            })?;

        let result = {
            // A panic mid-forecast leaves no half-updated model state behind.
            let mut predictor = self.predictor.lock().unwrap_or_else(PoisonError::into_inner);
            forecast(&closes, lookback, horizon, &mut **predictor)?
        };

        info!(
            %ticker,
            rows = closes.len(),
            horizon,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Forecast complete"
        );

        let next_day_prediction = result.next_value();
        Ok(TickerForecast {
            ticker,
            actual_prices: result.actual,
            predicted_prices: result.predicted,
            next_day_prediction,
        })
    }
}
