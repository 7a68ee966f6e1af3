//! End-to-end checks of the prediction service with stub collaborators.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use stockie_forecast::config::ForecastSettings;
use stockie_forecast::history::{self, CachedHistory, CsvCache, HistoryError, HistoryProvider};
use stockie_forecast::{BoxError, ForecastError, PredictionService, ServiceError, Window};

/// Serves a fixed series for every ticker except `MISSING`.
struct StaticHistory {
    closes: Vec<f64>,
}

impl HistoryProvider for StaticHistory {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch_closes(&self, ticker: &str, min_len: usize) -> history::Result<Vec<f64>> {
        if ticker == "MISSING" {
            return Err(HistoryError::NotFound(ticker.to_string()));
        }
        if self.closes.len() < min_len {
            return Err(HistoryError::InsufficientHistory {
                ticker: ticker.to_string(),
                required: min_len,
                actual: self.closes.len(),
            });
        }
        Ok(self.closes.clone())
    }
}

/// Always fails with a transient error.
struct DownHistory;

impl HistoryProvider for DownHistory {
    fn name(&self) -> &str {
        "down"
    }

    fn fetch_closes(&self, _ticker: &str, _min_len: usize) -> history::Result<Vec<f64>> {
        Err(HistoryError::Request("connection refused".to_string()))
    }
}

/// Counts fetches and serves `1..=20`.
struct CountingHistory {
    calls: Arc<AtomicUsize>,
}

impl HistoryProvider for CountingHistory {
    fn name(&self) -> &str {
        "counting"
    }

    fn fetch_closes(&self, _ticker: &str, _min_len: usize) -> history::Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((1..=20).map(|i| i as f64).collect())
    }
}

fn mean_predictor() -> Box<dyn stockie_forecast::OneStepPredictor + Send> {
    Box::new(|w: &Window| -> Result<f64, BoxError> { Ok(w.mean().unwrap_or(0.0)) })
}

fn settings(lookback: usize, horizon: usize) -> ForecastSettings {
    ForecastSettings {
        lookback,
        horizon,
        ..ForecastSettings::default()
    }
}

#[test]
fn forecast_matches_hand_computed_values() {
    let service = PredictionService::new(
        Box::new(StaticHistory {
            closes: vec![1.0, 2.0, 3.0, 4.0, 5.0],
        }),
        mean_predictor(),
        settings(3, 2),
    );

    let forecast = service.predict("aapl").unwrap();

    assert_eq!(forecast.ticker, "AAPL");
    assert_eq!(forecast.actual_prices, vec![3.0, 4.0, 5.0]);
    assert!((forecast.predicted_prices[0] - 4.0).abs() < 1e-9);
    assert!((forecast.predicted_prices[1] - 13.0 / 3.0).abs() < 1e-9);
    assert_eq!(forecast.next_day_prediction, Some(forecast.predicted_prices[0]));
}

#[test]
fn json_uses_front_end_field_names() {
    let service = PredictionService::new(
        Box::new(StaticHistory {
            closes: vec![10.0, 11.0, 12.0],
        }),
        mean_predictor(),
        settings(3, 1),
    );

    let json = serde_json::to_value(service.predict("SHOP").unwrap()).unwrap();

    assert_eq!(json["ticker"], "SHOP");
    assert_eq!(json["actual_prices"].as_array().unwrap().len(), 3);
    assert_eq!(json["predicted_prices"].as_array().unwrap().len(), 1);
    assert!(json["next_day_prediction"].is_f64());
}

#[test]
fn blank_ticker_is_rejected() {
    let service = PredictionService::new(
        Box::new(StaticHistory { closes: vec![1.0] }),
        mean_predictor(),
        settings(1, 1),
    );

    let err = service.predict("   ").unwrap_err();
    assert!(matches!(err, ServiceError::MissingTicker));
    assert_eq!(err.status_code(), 400);
}

#[test]
fn provider_shortfalls_surface_as_insufficient_data() {
    let service = PredictionService::new(
        Box::new(StaticHistory {
            closes: vec![1.0, 2.0],
        }),
        mean_predictor(),
        settings(3, 1),
    );

    let err = service.predict("AAPL").unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Forecast(ForecastError::InsufficientData {
            required: 3,
            actual: 2
        })
    ));
    assert_eq!(err.status_code(), 422);

    let err = service.predict("MISSING").unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Forecast(ForecastError::InsufficientData {
            required: 3,
            actual: 0
        })
    ));
}

#[test]
fn upstream_outage_is_a_gateway_error() {
    let service = PredictionService::new(Box::new(DownHistory), mean_predictor(), settings(3, 1));

    let err = service.predict("AAPL").unwrap_err();
    assert!(matches!(err, ServiceError::History(HistoryError::Request(_))));
    assert_eq!(err.status_code(), 502);
}

#[test]
fn cached_history_serves_forecasts_during_outage() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CsvCache::new(dir.path());
    cache.store("AAPL", &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();

    let service = PredictionService::new(
        Box::new(CachedHistory::new(DownHistory, cache)),
        mean_predictor(),
        settings(3, 2),
    );

    let forecast = service.predict("AAPL").unwrap();
    assert_eq!(forecast.actual_prices, vec![3.0, 4.0, 5.0]);
    assert_eq!(forecast.predicted_prices.len(), 2);
}

#[test]
fn predictor_failure_reports_step_and_no_partial_output() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let predictor = Box::new(move |_: &Window| -> Result<f64, BoxError> {
        if counter.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err("model crashed".into());
        }
        Ok(0.5)
    });

    let service = PredictionService::new(
        Box::new(StaticHistory {
            closes: (0..20).map(|i| i as f64).collect(),
        }),
        predictor,
        settings(10, 5),
    );

    let err = service.predict("AAPL").unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Forecast(ForecastError::PredictionStep { step: 2, .. })
    ));
    assert_eq!(err.status_code(), 500);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn concurrent_requests_share_one_predictor() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let predictor = Box::new(move |w: &Window| -> Result<f64, BoxError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(w.newest().unwrap_or(0.0))
    });

    let service = Arc::new(PredictionService::new(
        Box::new(StaticHistory {
            closes: (1..=30).map(|i| i as f64).collect(),
        }),
        predictor,
        settings(10, 4),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || service.predict("AAPL").unwrap())
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 8 * 4);
    for forecast in &results {
        assert_eq!(forecast, &results[0]);
        // Persistence model repeats the last close.
        for &p in &forecast.predicted_prices {
            assert!((p - 30.0).abs() < 1e-9);
        }
    }
}

#[test]
fn unsafe_tickers_never_reach_the_provider() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let service = PredictionService::new(
        Box::new(CountingHistory {
            calls: Arc::clone(&fetches),
        }),
        mean_predictor(),
        settings(3, 1),
    );

    for ticker in ["AAPL?range=max&x=", "../../X", "aapl/../msft", "TOOLONGTICKERSYMBOL"] {
        let err = service.predict(ticker).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTicker(_)), "{ticker}: {err}");
        assert_eq!(err.status_code(), 400);
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 0);

    assert!(service.predict("brk.b").is_ok());
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn oversized_horizon_is_rejected_and_service_keeps_working() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let predictor = Box::new(move |w: &Window| -> Result<f64, BoxError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(w.mean().unwrap_or(0.0))
    });
    let service = PredictionService::new(
        Box::new(StaticHistory {
            closes: vec![1.0, 2.0, 3.0, 4.0, 5.0],
        }),
        predictor,
        settings(3, 2),
    );
    let max_horizon = service.settings().max_horizon;

    for horizon in [usize::MAX, max_horizon + 1, 0] {
        let err = service.predict_with_horizon("AAPL", horizon).unwrap_err();
        assert!(
            matches!(
                err,
                ServiceError::Forecast(ForecastError::InvalidParameter { ref name, .. }) if name == "horizon"
            ),
            "{horizon}: {err}"
        );
        assert_eq!(err.status_code(), 400);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let forecast = service.predict_with_horizon("AAPL", max_horizon).unwrap();
    assert_eq!(forecast.predicted_prices.len(), max_horizon);
    assert_eq!(service.predict("AAPL").unwrap().predicted_prices.len(), 2);
}

#[test]
fn predictor_panic_does_not_disable_later_requests() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let predictor = Box::new(move |w: &Window| -> Result<f64, BoxError> {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("model runtime aborted");
        }
        Ok(w.mean().unwrap_or(0.0))
    });
    let service = PredictionService::new(
        Box::new(StaticHistory {
            closes: vec![1.0, 2.0, 3.0, 4.0, 5.0],
        }),
        predictor,
        settings(3, 2),
    );

    let first = panic::catch_unwind(AssertUnwindSafe(|| service.predict("AAPL")));
    assert!(first.is_err());

    let forecast = service.predict("AAPL").unwrap();
    assert!((forecast.predicted_prices[0] - 4.0).abs() < 1e-9);
}
